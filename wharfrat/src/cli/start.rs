//! `start`: ensure the crate's container exists and is running, without
//! executing anything inside it.

use std::process::ExitCode;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Args as ClapArgs;

use wharfrat_config::{container_name, get_crate, Labels};
use wharfrat_docker::{create, ensure_running, Client, Context};

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long = "crate")]
    pub krate: Option<String>,
    #[arg(long)]
    pub force: bool,
    #[arg(long = "auto-clean")]
    pub auto_clean: bool,
}

pub async fn execute(ctx: &Context, args: Args) -> Result<ExitCode> {
    let host_cwd = Utf8PathBuf::from_path_buf(std::env::current_dir()?).expect("utf8 cwd");
    let resolved = get_crate(&host_cwd, args.krate.as_deref())?;
    let user = super::stop::current_user();

    let client = Client::connect(ctx.local_config.docker_url.as_deref())?;
    let labels = Labels {
        project: resolved.project_root.to_string(),
        krate: resolved.name.clone(),
        commit: env!("CARGO_PKG_VERSION").to_owned(),
        config: resolved.config.fingerprint(),
        branch: resolved.branch.clone(),
        user: user.clone(),
    };
    let name = container_name(&labels.project, &labels.krate, &labels.branch, &labels.user);
    let current_image_id = client.image_id(&resolved.config.image).await?;

    ensure_running(
        client.engine(),
        name.as_ref(),
        &labels.config,
        &labels.commit,
        current_image_id.as_deref(),
        args.force,
        args.auto_clean,
        || async { create(&client, ctx, super::run::build_create_request(&resolved, &labels, &user)).await },
    )
    .await?;

    Ok(ExitCode::SUCCESS)
}
