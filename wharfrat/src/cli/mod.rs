//! The primary (`wharfrat`) and short-alias (`wr`) personalities. Dispatch
//! inspects its own binary name only to decide the default subcommand —
//! `wr` with no recognised subcommand runs its argv as a command, mirroring
//! the original split between `cmd/wharfrat` and `cmd/wr`.

mod env_cmd;
mod info;
mod list;
mod login;
mod logout;
mod prune;
mod remove;
mod run;
mod start;
mod stop;

use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use wharfrat_config::{config_dir, LocalConfig};
use wharfrat_docker::Context;

#[derive(clap::Args)]
pub struct VersionArgs {
    /// Print only the bare version string (what `env update` compares against).
    #[arg(long)]
    pub commit: bool,
}

#[derive(Parser)]
#[command(name = "wharfrat", about = "Bind a project workspace to its container dev environment")]
struct Cli {
    /// Verbose logging to the per-user log file.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,

    /// When no subcommand is given, these words are the command to run
    /// (the `wr` shorthand's only mode, and `wharfrat`'s implicit `run`).
    #[arg(trailing_var_arg = true)]
    trailing: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command inside the crate's container (the default).
    Run(run::Args),
    /// Stop the crate's container without removing it.
    Stop(stop::Args),
    /// Remove the crate's container.
    Remove(remove::Args),
    /// Start a previously stopped container without running a command.
    Start(start::Args),
    /// List known containers.
    List(list::Args),
    /// Remove containers whose crate can no longer be resolved.
    Prune(prune::Args),
    /// Show the container that would be used for the current crate.
    Info(info::Args),
    /// Save registry credentials for image pulls.
    Login(login::Args),
    /// Clear saved registry credentials.
    Logout(logout::Args),
    /// Print the tool's version.
    Version(VersionArgs),
    /// Manage a venv-style exported-binary environment.
    Env(env_cmd::Args),
}

pub async fn run(argv: &[String]) -> Result<ExitCode> {
    let cli = Cli::parse_from(argv);

    let dir = config_dir();
    let local_config = LocalConfig::load(&dir).unwrap_or_default();
    let log_path = dir.join("wharfrat.log");
    crate::logging::setup(&log_path, cli.debug);

    let mut ctx = Context::new(local_config, dir);
    crate::venv::register_after_create(&mut ctx);

    match cli.command {
        Some(Commands::Run(args)) => run::execute(&ctx, args).await,
        Some(Commands::Stop(args)) => stop::execute(&ctx, args).await,
        Some(Commands::Remove(args)) => remove::execute(&ctx, args).await,
        Some(Commands::Start(args)) => start::execute(&ctx, args).await,
        Some(Commands::List(args)) => list::execute(&ctx, args).await,
        Some(Commands::Prune(args)) => prune::execute(&ctx, args).await,
        Some(Commands::Info(args)) => info::execute(&ctx, args).await,
        Some(Commands::Login(args)) => login::execute(&ctx, args).await,
        Some(Commands::Logout(args)) => logout::execute(&ctx, args).await,
        Some(Commands::Version(args)) => {
            if args.commit {
                println!("{}", env!("CARGO_PKG_VERSION"));
            } else {
                println!("wharfrat {}", env!("CARGO_PKG_VERSION"));
            }
            Ok(ExitCode::SUCCESS)
        }
        Some(Commands::Env(args)) => env_cmd::execute(&ctx, args).await,
        None => run::execute(&ctx, run::Args::from_trailing(cli.trailing)).await,
    }
}
