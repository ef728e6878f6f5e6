//! `logout`: clear saved registry credentials.

use std::process::ExitCode;

use anyhow::Result;
use clap::Args as ClapArgs;

use wharfrat_config::{config_dir, AuthCache};
use wharfrat_docker::Context;

#[derive(ClapArgs)]
pub struct Args {
    pub server: String,
}

pub async fn execute(_ctx: &Context, args: Args) -> Result<ExitCode> {
    let dir = config_dir();
    let mut auth = AuthCache::load(&dir)?;
    if auth.get(&args.server).is_some() {
        auth.clear(&args.server)?;
        println!("Removed credentials for {}", args.server);
    }
    Ok(ExitCode::SUCCESS)
}
