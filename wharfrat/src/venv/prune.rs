//! `env prune`: find shims whose target binary search no longer turns up
//! inside the container (renamed, rebuilt elsewhere, feature removed).

use std::collections::BTreeMap;

use anyhow::{Context as _, Result};
use camino::Utf8Path;
use wharfrat_config::{container_name, Labels};
use wharfrat_docker::Client;

use super::shim::ShimScript;
use super::state::State;

pub async fn execute(remove: bool) -> Result<()> {
    let Some(state) = State::load()? else { anyhow::bail!("environment not activated") };
    let client = Client::connect(None)?;

    let scripts = find_exec_scripts(&state)?;
    for (crate_name, scripts) in scripts {
        prune_crate(&client, &state, &crate_name, &scripts, remove).await?;
    }
    Ok(())
}

/// crate name -> (script path -> its target command[0]).
fn find_exec_scripts(state: &State) -> Result<BTreeMap<String, BTreeMap<String, String>>> {
    let bin_dir = Utf8Path::new(&state.env_path).join("bin");
    let mut scripts: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();

    for entry in std::fs::read_dir(&bin_dir).with_context(|| format!("reading {bin_dir}"))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = Utf8Path::from_path(&entry.path()).context("non-utf8 shim path")?.to_owned();
        if !is_exec_script(&path)? {
            log::debug!("venv prune: ignoring non-shim {path}");
            continue;
        }
        let script = ShimScript::parse(&path)?;
        if let Some(target) = script.command.first() {
            scripts.entry(script.krate).or_default().insert(path.to_string(), target.clone());
        }
    }
    Ok(scripts)
}

fn is_exec_script(path: &Utf8Path) -> Result<bool> {
    use std::io::BufRead as _;
    let file = std::fs::File::open(path).with_context(|| format!("opening {path}"))?;
    let mut first_line = String::new();
    std::io::BufReader::new(file).read_line(&mut first_line)?;
    Ok(first_line.starts_with("#!") && first_line.trim_end().ends_with("/wr-exec"))
}

async fn prune_crate(
    client: &Client,
    state: &State,
    crate_name: &str,
    scripts: &BTreeMap<String, String>,
    remove: bool,
) -> Result<()> {
    let project_dir = Utf8Path::new(&state.project);
    let project = wharfrat_config::Project::locate(project_dir)?;
    let crate_config = project.crate_named(crate_name)?.clone();

    let current_user = super::current_user();
    let labels = Labels {
        project: state.project.clone(),
        krate: crate_name.to_owned(),
        commit: env!("CARGO_PKG_VERSION").to_owned(),
        config: crate_config.fingerprint(),
        branch: wharfrat_config::vc::current_branch(project_dir),
        user: current_user.clone(),
    };
    let name = container_name(&labels.project, &labels.krate, &labels.branch, &labels.user);

    let current_image_id = client.image_id(&crate_config.image).await?;
    let container_id = wharfrat_docker::ensure_running(
        client.engine(),
        name.as_ref(),
        &labels.config,
        &labels.commit,
        current_image_id.as_deref(),
        false,
        false,
        || async {
            wharfrat_docker::create(client, &super::load_context(), super::build_create_request(&crate_config, &labels, project_dir, &current_user))
                .await
        },
    )
    .await
    .with_context(|| format!("running container for {crate_name}"))?;

    let mut argv = vec!["/sbin/wr-init".to_owned(), "search".to_owned(), "-x".to_owned()];
    argv.extend(crate_config.export_bin.iter().cloned());
    let stdout = wharfrat_docker::get_output(client, &container_id, &argv, None).await?;
    let targets: std::collections::HashSet<String> =
        stdout.split(|&b| b == b'\n').map(|l| String::from_utf8_lossy(l).trim().to_owned()).filter(|l| !l.is_empty()).collect();

    let missing: Vec<&String> = scripts.iter().filter(|(_, target)| !targets.contains(*target)).map(|(script, _)| script).collect();
    if missing.is_empty() {
        return Ok(());
    }

    println!("Scripts with missing commands:");
    for script in &missing {
        println!("  {script}");
    }

    if !remove {
        println!("\nre-run with -r/--remove to remove");
        return Ok(());
    }

    for script in missing {
        if let Err(e) = std::fs::remove_file(script) {
            log::warn!("failed to remove {script}: {e}");
            println!("Failed to remove {script}");
        }
    }

    Ok(())
}
