//! `prune`: remove containers whose crate can no longer be resolved from
//! disk (project file or crate definition deleted, branch no longer known).

use std::process::ExitCode;

use anyhow::Result;
use camino::Utf8Path;
use clap::Args as ClapArgs;

use wharfrat_config::{vc, Project};
use wharfrat_docker::{ensure_removed, Client, Context};

#[derive(ClapArgs)]
pub struct Args {
    /// Actually remove the containers found to be obsolete.
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,
}

pub async fn execute(_ctx: &Context, args: Args) -> Result<ExitCode> {
    let client = Client::connect(None)?;
    let containers = client.list_wharfrat_containers().await?;
    log::debug!("prune: found {} containers", containers.len());

    let mut missing = Vec::new();

    for container in &containers {
        let labels = container.labels.clone().unwrap_or_default();
        let project_root = labels.get("rat.wharf.project").cloned().unwrap_or_default();
        let crate_name = labels.get("rat.wharf.crate").cloned().unwrap_or_default();
        let branch = labels.get("rat.wharf.branch").cloned().unwrap_or_default();
        let name = container.names.as_ref().and_then(|n| n.first()).map(|n| n.trim_start_matches('/').to_owned()).unwrap_or_default();

        let project_dir = Utf8Path::new(&project_root);
        let project_branch = vc::current_branch(project_dir);

        let resolvable = if !branch.is_empty() && branch != project_branch {
            vc::read_file_at_branch(project_dir, &branch, ".wrproject").is_some()
                && crate_still_defined_at_branch(project_dir, &branch, &crate_name)
        } else {
            crate_still_defined(project_dir, &crate_name)
        };

        if !resolvable {
            missing.push(name);
        }
    }

    log::debug!("prune: missing {missing:?}");

    for name in &missing {
        if args.yes {
            match ensure_removed(client.engine(), name).await {
                Ok(()) => println!("Removed {name}"),
                Err(e) => println!("Failed to remove {name}: {e}"),
            }
        } else {
            println!("Would remove {name}");
        }
    }

    if !args.yes && !missing.is_empty() {
        println!("\nRe-run with --yes to remove containers");
    }

    Ok(ExitCode::SUCCESS)
}

fn crate_still_defined(project_dir: &Utf8Path, crate_name: &str) -> bool {
    match Project::locate(project_dir) {
        Ok(project) => project.crate_named(crate_name).is_ok(),
        Err(_) => false,
    }
}

fn crate_still_defined_at_branch(project_dir: &Utf8Path, branch: &str, crate_name: &str) -> bool {
    let project_path = project_dir.join(".wrproject");
    wharfrat_config::open_vc_crate(&project_path, branch, crate_name).is_ok()
}
