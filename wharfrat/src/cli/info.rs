//! `info`: show the container that would be used for the current crate,
//! whether or not it currently exists.

use std::process::ExitCode;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Args as ClapArgs;

use wharfrat_config::{container_name, get_crate};
use wharfrat_docker::{Client, Context};

#[derive(ClapArgs)]
pub struct Args {
    #[arg(long = "crate")]
    pub krate: Option<String>,
}

pub async fn execute(_ctx: &Context, args: Args) -> Result<ExitCode> {
    let host_cwd = Utf8PathBuf::from_path_buf(std::env::current_dir()?).expect("utf8 cwd");
    let resolved = get_crate(&host_cwd, args.krate.as_deref())?;
    let user = super::stop::current_user();

    let client = Client::connect(_ctx.local_config.docker_url.as_deref())?;
    let name = container_name(&resolved.project_root.to_string(), &resolved.name, &resolved.branch, &user);
    log::debug!("info: container {name}");

    let details = client.inspect_container(name.as_ref()).await?;

    let mut cfg = String::new();
    let mut branch = "n/a".to_owned();
    let mut addr = "n/a".to_owned();
    let mut status = "no container".to_owned();

    if let Some(details) = &details {
        if let Some(labels) = details.config.as_ref().and_then(|c| c.labels.as_ref()) {
            cfg = labels.get("rat.wharf.config").cloned().unwrap_or_default();
            branch = labels.get("rat.wharf.branch").cloned().unwrap_or_else(|| "n/a".to_owned());
        }
        if let Some(net) = &details.network_settings {
            let v4 = net.ip_address.clone().unwrap_or_default();
            let v6 = net.global_ipv6_address.clone().unwrap_or_default();
            addr = match (v4.is_empty(), v6.is_empty()) {
                (false, false) => format!("{v4}, {v6}"),
                (false, true) => v4,
                (true, false) => v6,
                (true, true) => "n/a".to_owned(),
            };
        }
        status = details.state.as_ref().and_then(|s| s.status).map(|s| s.to_string()).unwrap_or_else(|| "unknown".to_owned());
    }

    println!("Project Folder:   {}", resolved.project_root);
    println!("Crate:            {}", resolved.name);
    println!("Image:            {}", resolved.config.image);
    println!("Container Name:   {name}");
    println!("Container Branch: {branch}");
    println!("Container State:  {status}");
    println!("Container Stale:  {}", cfg != resolved.config.fingerprint());
    println!("Container IP:     {addr}");

    Ok(ExitCode::SUCCESS)
}
