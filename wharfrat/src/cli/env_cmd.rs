//! `env {create|update|info|prune}`: the venv feature's CLI surface. All the
//! actual work lives in [`crate::venv`]; this module is just clap plumbing.

use std::process::ExitCode;

use anyhow::Result;
use clap::{Args as ClapArgs, Subcommand};

use wharfrat_docker::{Client, Context};

#[derive(ClapArgs)]
pub struct Args {
    #[command(subcommand)]
    pub command: EnvCommands,
}

#[derive(Subcommand)]
pub enum EnvCommands {
    /// Create a new exported-binary environment at `path`.
    Create(CreateArgs),
    /// Replace this environment's vendored `wharfrat` with the one on `PATH`.
    Update(UpdateArgs),
    /// Print the active environment, if any.
    Info,
    /// Remove environments whose project no longer exists.
    Prune(PruneArgs),
}

#[derive(ClapArgs)]
pub struct CreateArgs {
    pub path: String,
    /// Crates to export; every crate in the project if none are given.
    #[arg(trailing_var_arg = true)]
    pub crates: Vec<String>,
}

#[derive(ClapArgs)]
pub struct UpdateArgs {
    /// Replace the vendored binary even if it's already up to date.
    #[arg(long)]
    pub force: bool,
}

#[derive(ClapArgs)]
pub struct PruneArgs {
    /// Actually remove stale environments instead of just listing them.
    #[arg(long)]
    pub remove: bool,
}

pub async fn execute(_ctx: &Context, args: Args) -> Result<ExitCode> {
    match args.command {
        EnvCommands::Create(args) => {
            let client = Client::connect(None)?;
            crate::venv::create(&args.path, args.crates, &client).await?;
            Ok(ExitCode::SUCCESS)
        }
        EnvCommands::Update(args) => {
            crate::venv::update_wharfrat(args.force)?;
            Ok(ExitCode::SUCCESS)
        }
        EnvCommands::Info => {
            crate::venv::display_info();
            Ok(ExitCode::SUCCESS)
        }
        EnvCommands::Prune(args) => {
            crate::venv::prune(args.remove).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
