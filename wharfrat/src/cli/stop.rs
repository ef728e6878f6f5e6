//! `stop`: ensure the crate's container is stopped, leaving it in place.

use std::process::ExitCode;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Args as ClapArgs;

use wharfrat_config::{container_name, get_crate};
use wharfrat_docker::{ensure_stopped, Client, Context};

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long = "crate")]
    pub krate: Option<String>,
}

pub async fn execute(ctx: &Context, args: Args) -> Result<ExitCode> {
    let host_cwd = Utf8PathBuf::from_path_buf(std::env::current_dir()?).expect("utf8 cwd");
    let resolved = get_crate(&host_cwd, args.krate.as_deref())?;
    let user = current_user();

    let client = Client::connect(ctx.local_config.docker_url.as_deref())?;
    let name = container_name(&resolved.project_root.to_string(), &resolved.name, &resolved.branch, &user);
    ensure_stopped(client.engine(), name.as_ref()).await?;
    Ok(ExitCode::SUCCESS)
}

pub(super) fn current_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid()).ok().flatten().map(|u| u.name).unwrap_or_else(|| "unknown".to_owned())
}
