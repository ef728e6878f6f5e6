//! The venv feature (§4.8): a directory of shim scripts that re-enter a
//! crate's container for one exported binary each, tracked in `.state.json`
//! and kept in sync as a container is used, recreated, or abandoned.

mod activate;
mod prune;
mod shim;
mod state;

use std::process::ExitCode;

use anyhow::{bail, Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};

use wharfrat_config::{container_name, Crate, Labels, Project};
use wharfrat_docker::{Client, Context, CreateRequest};

pub use state::State;

/// `env create <path>`: sets up a fresh environment directory exporting the
/// named crates (or every crate in the project, if none are named).
pub async fn create(path: &str, crates: Vec<String>, client: &Client) -> Result<()> {
    let project = Project::locate(Utf8Path::new("."))?;
    let crates = if crates.is_empty() { project.crate_names().map(str::to_owned).collect() } else { crates };

    let abs_path = Utf8PathBuf::from_path_buf(std::fs::canonicalize(path).unwrap_or_else(|_| std::path::PathBuf::from(path)))
        .unwrap_or_else(|p| Utf8PathBuf::from_path_buf(p).expect("utf8 path"));
    if abs_path.exists() {
        bail!("{abs_path} already exists");
    }

    ensure_layout(&abs_path).context("setting up environment layout")?;

    match build_state(&abs_path, project.root(), &crates, client).await {
        Ok(state) => state.save(),
        Err(e) => {
            let _ = std::fs::remove_dir_all(&abs_path);
            Err(e)
        }
    }
}

fn ensure_layout(path: &Utf8Path) -> Result<()> {
    let bin = path.join("bin");
    if bin.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(&bin).with_context(|| format!("creating {bin}"))?;

    let self_exe = std::fs::canonicalize("/proc/self/exe").context("resolving running executable")?;
    let wr_path = bin.join("wharfrat");
    std::fs::copy(&self_exe, &wr_path).with_context(|| format!("copying self to {wr_path}"))?;
    set_executable(&wr_path)?;

    for alias in ["wr", "wr-exec"] {
        let link = bin.join(alias);
        std::os::unix::fs::symlink(&wr_path, &link).with_context(|| format!("linking {link}"))?;
    }

    activate::write(path)
}

fn set_executable(path: &Utf8Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).with_context(|| format!("chmod {path}"))
}

async fn build_state(path: &Utf8Path, project_root: &Utf8Path, crates: &[String], client: &Client) -> Result<State> {
    let mut state = State::new(path.to_string(), project_root.to_string(), crates.to_vec());
    let current_user = current_user();

    for name in crates {
        let resolved = wharfrat_config::get_crate(project_root, Some(name))?;
        let labels = Labels {
            project: project_root.to_string(),
            krate: name.clone(),
            commit: env!("CARGO_PKG_VERSION").to_owned(),
            config: resolved.config.fingerprint(),
            branch: resolved.branch.clone(),
            user: current_user.clone(),
        };
        let current_image_id = client.image_id(&resolved.config.image).await?;
        let id = wharfrat_docker::ensure_running(
            client.engine(),
            container_name(&labels.project, &labels.krate, &labels.branch, &labels.user).as_ref(),
            &labels.config,
            &labels.commit,
            current_image_id.as_deref(),
            false,
            true,
            || async {
                wharfrat_docker::create(client, &load_context(), build_create_request(&resolved.config, &labels, project_root, &current_user)).await
            },
        )
        .await
        .with_context(|| format!("starting container for {name}"))?;

        state.update(client, &id, name, &resolved.config.export_bin, "", "", None).await.context("exporting binaries")?;
    }

    Ok(state)
}

/// Called after every exec: error-swallowing and fire-and-forget, matching
/// the original's `defer venv.Update(...)`.
pub async fn update(client: &Client, container_id: &str, crate_config: &Crate, crate_name: &str, user: Option<&str>, cmd: &[String]) {
    if crate_config.export_bin.is_empty() {
        return;
    }
    let Ok(Some(mut state)) = State::load() else { return };
    if !state.crates.iter().any(|c| c == crate_name) {
        return;
    }
    if let Err(e) = state.update(client, container_id, crate_name, &crate_config.export_bin, user.unwrap_or(""), "", Some(cmd)).await {
        log::warn!("failed to update exported binaries: {e:#}");
        return;
    }
    if let Err(e) = state.save() {
        log::warn!("failed to save environment state: {e:#}");
    }
}

/// Registers the after-create rebuild hook with the shared [`Context`] —
/// wired from `cli::run` before any container operation runs.
pub fn register_after_create(ctx: &mut Context) {
    ctx.register_after_create(Box::new(|container_id: &str| {
        let container_id = container_id.to_owned();
        tokio::spawn(async move {
            if let Err(e) = rebuild(&container_id).await {
                log::warn!("venv rebuild failed: {e:#}");
            }
        });
    }));
}

async fn rebuild(container_id: &str) -> Result<()> {
    let Some(mut state) = State::load()? else { return Ok(()) };
    let host_cwd = Utf8PathBuf::from_path_buf(std::env::current_dir()?).expect("utf8 cwd");
    let resolved = wharfrat_config::get_crate(&host_cwd, None)?;
    if !state.matches_crate(&resolved) {
        return Ok(());
    }
    let client = Client::connect(None)?;
    state.rebuild(&client, container_id, &resolved.config, &resolved.name).await?;
    state.save()
}

/// `env info`: prints the active environment, or that there isn't one.
pub fn display_info() {
    match State::load() {
        Ok(Some(state)) => {
            println!("Path: {}", state.env_path);
            println!("Project: {}", state.project);
            println!("Crates: {}", state.crates.join(", "));
        }
        Ok(None) => println!("No Environment"),
        Err(e) => {
            log::warn!("failed to load environment state: {e:#}");
            println!("Failed to load environment state");
        }
    }
}

/// `env update`: replaces this environment's vendored `wharfrat` with
/// whatever's on `PATH` outside it, if that one is a different build.
pub fn update_wharfrat(force: bool) -> Result<()> {
    let Some(state) = State::load()? else { bail!("environment not activated") };
    let Some(external) = state.find_external_wharfrat() else { return Ok(()) };
    log::debug!("external wharfrat: {external}");

    let external_commit = std::process::Command::new(&external)
        .args(["version", "--commit"])
        .output()
        .context("running external wharfrat")?;
    let external_commit = String::from_utf8_lossy(&external_commit.stdout).trim().to_owned();
    let current_commit = env!("CARGO_PKG_VERSION");

    if external_commit == current_commit && !force {
        log::debug!("already up to date: {current_commit}");
        return Ok(());
    }

    let wr_path = Utf8Path::new(&state.env_path).join("bin").join("wharfrat");
    std::fs::remove_file(&wr_path).with_context(|| format!("removing {wr_path}"))?;
    std::fs::copy(&external, &wr_path).with_context(|| format!("copying {external} to {wr_path}"))?;
    set_executable(&wr_path)
}

/// `env prune`: delegates to the dedicated [`prune`] submodule.
pub async fn prune(remove: bool) -> Result<()> {
    prune::execute(remove).await
}

/// `wr-exec` personality: `argv[1]` is the shim script's own path (per
/// shebang-invocation convention), `argv[2..]` are the user's arguments.
pub async fn exec_shim(argv: &[String]) -> Result<ExitCode> {
    let Some(script_path) = argv.get(1) else { bail!("wr-exec requires a script path") };
    let script = shim::ShimScript::parse(Utf8Path::new(script_path))?;
    let extra_args = &argv[2.min(argv.len())..];

    let client = Client::connect(None)?;
    let base = script.path.parent().unwrap_or(Utf8Path::new(".")).to_owned();
    let resolved = if script.project.is_empty() {
        wharfrat_config::get_crate(&base, Some(&script.krate))?
    } else {
        let project_path = if Utf8Path::new(&script.project).is_absolute() {
            Utf8PathBuf::from(&script.project)
        } else {
            base.join(&script.project)
        };
        let project = Project::parse_file(&project_path)?;
        let config = project.crate_named(&script.krate)?.clone();
        wharfrat_config::ResolvedCrate {
            branch: wharfrat_config::vc::current_branch(project.root()),
            project_root: project.root().to_owned(),
            name: script.krate.clone(),
            config,
        }
    };

    let current_user = current_user();
    let labels = Labels {
        project: resolved.project_root.to_string(),
        krate: resolved.name.clone(),
        commit: env!("CARGO_PKG_VERSION").to_owned(),
        config: resolved.config.fingerprint(),
        branch: resolved.branch.clone(),
        user: current_user.clone(),
    };
    let name = container_name(&labels.project, &labels.krate, &labels.branch, &labels.user);

    let current_image_id = client.image_id(&resolved.config.image).await?;
    let container_id = wharfrat_docker::ensure_running(
        client.engine(),
        name.as_ref(),
        &labels.config,
        &labels.commit,
        current_image_id.as_deref(),
        false,
        script.auto_clean,
        || async { wharfrat_docker::create(&client, &load_context(), build_create_request(&resolved.config, &labels, &resolved.project_root, &current_user)).await },
    )
    .await?;

    let mut cmd = if script.command.is_empty() {
        vec![script.path.file_name().unwrap_or("wr-exec").to_owned()]
    } else {
        script.command.clone()
    };
    let args = if script.args_defined { script.args.clone() } else { extra_args.to_vec() };
    cmd.extend(args);

    let user = Some(if script.user.is_empty() { current_user.as_str() } else { script.user.as_str() });
    let outcome = wharfrat_docker::exec_cmd(
        &client,
        wharfrat_docker::ExecRequest {
            container_id: &container_id,
            argv: cmd.clone(),
            user,
            env: Default::default(),
            workdir: None,
            tty: false,
            extra_fds: &[],
            version: script.version.max(1).min(2),
        },
    )
    .await
    .context("running exported command")?;

    update(&client, &container_id, &resolved.config, &resolved.name, user, &cmd).await;

    Ok(exit_code_from(outcome.exit_code))
}

fn exit_code_from(code: i64) -> ExitCode {
    ExitCode::from(code.rem_euclid(256) as u8)
}

pub(crate) fn current_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid()).ok().flatten().map(|u| u.name).unwrap_or_else(|| "unknown".to_owned())
}

/// `env`/`wr-exec` entry points run outside `cli::run`'s usual startup, so
/// they load the local config themselves before creating a container.
pub(crate) fn load_context() -> Context {
    let dir = wharfrat_config::config_dir();
    let local_config = wharfrat_config::LocalConfig::load(&dir).unwrap_or_default();
    Context::new(local_config, dir)
}

pub(crate) fn build_create_request<'a>(
    crate_config: &'a Crate,
    labels: &'a Labels,
    project_root: &'a Utf8Path,
    current_user: &'a str,
) -> CreateRequest<'a> {
    let uid = nix::unistd::getuid().as_raw();
    let gid = nix::unistd::getgid().as_raw();
    let gecos = nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.gecos.to_string_lossy().into_owned())
        .unwrap_or_default();

    CreateRequest {
        name: labels.krate.clone(),
        image: crate_config.image.clone(),
        hostname: crate_config.hostname.as_deref().unwrap_or("dev"),
        labels,
        mount_home: crate_config.mount_home,
        project_root: project_root.as_str(),
        project_mount: crate_config.project_mount.as_deref(),
        volumes: &crate_config.volumes,
        tmpfs: &crate_config.tmpfs,
        ports: &crate_config.ports,
        network: crate_config.network.as_deref(),
        cap_add: &crate_config.cap_add,
        cap_drop: &crate_config.cap_drop,
        copy_groups: &crate_config.copy_groups,
        groups: &crate_config.groups,
        username: current_user,
        uid,
        gid,
        gecos,
        setup_prep: crate_config.setup_prep.as_deref(),
        setup_pre: crate_config.setup_pre.as_deref(),
        setup_post: crate_config.setup_post.as_deref(),
        tarballs: &crate_config.tarballs,
    }
}
