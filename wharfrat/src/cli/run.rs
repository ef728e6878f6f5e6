//! `run` (and the bare `wr`/`wharfrat` invocation): resolve the crate,
//! ensure its container is running, then exec the given command inside it.

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use camino::Utf8PathBuf;
use clap::Args as ClapArgs;

use wharfrat_config::{container_name, get_crate, Labels};
use wharfrat_docker::{
    build_self_archive, create, ensure_running, read_self_exe, Client, Context, ReservedEnv,
};

#[derive(ClapArgs, Default)]
pub struct Args {
    /// Crate to use, overriding `.wrcrate`/project default.
    #[arg(long = "crate")]
    pub krate: Option<String>,
    /// Remove the container first, then recreate.
    #[arg(long)]
    pub clean: bool,
    /// Recreate automatically if the existing container is stale.
    #[arg(long = "auto-clean")]
    pub auto_clean: bool,
    /// Run as this user instead of the crate's default.
    #[arg(long)]
    pub user: Option<String>,
    /// Override `working-dir` resolution.
    #[arg(long)]
    pub workdir: Option<String>,
    /// Ignore staleness and reuse the container regardless.
    #[arg(long)]
    pub force: bool,
    /// Stop the container again once the command exits.
    #[arg(long)]
    pub stop: bool,
    /// The command (and its arguments) to run; defaults to the crate's shell.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl Args {
    pub fn from_trailing(trailing: Vec<String>) -> Self {
        Args { command: trailing, ..Default::default() }
    }
}

pub async fn execute(ctx: &Context, args: Args) -> Result<ExitCode> {
    let host_cwd = Utf8PathBuf::from_path_buf(std::env::current_dir()?).expect("utf8 cwd");
    let resolved = get_crate(&host_cwd, args.krate.as_deref())?;
    let crate_config = &resolved.config;

    let client = Client::connect(ctx.local_config.docker_url.as_deref())?;

    let current_user = nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.name)
        .unwrap_or_else(|| "unknown".to_owned());

    let labels = Labels {
        project: resolved.project_root.to_string(),
        krate: resolved.name.clone(),
        commit: tool_commit(),
        config: crate_config.fingerprint(),
        branch: resolved.branch.clone(),
        user: current_user.clone(),
    };
    let name = container_name(&labels.project, &labels.krate, &labels.branch, &labels.user);

    if args.clean {
        wharfrat_docker::ensure_removed(client.engine(), name.as_ref()).await?;
    }

    // `None` (image not pulled locally yet) means the freshness check can't
    // compare image ids at all; `ensure_running` then falls back to the
    // label-only comparison, matching a not-yet-pulled image having nothing
    // to be stale against.
    let current_image_id = client.image_id(&crate_config.image).await?;

    let container_id = ensure_running(
        client.engine(),
        name.as_ref(),
        &labels.config,
        &labels.commit,
        current_image_id.as_deref(),
        args.force,
        args.auto_clean,
        || async {
            create(
                &client,
                ctx,
                build_create_request(&resolved, &labels, &current_user),
            )
            .await
        },
    )
    .await?;

    let command = if args.command.is_empty() {
        vec![crate_config.shell.clone().unwrap_or_else(|| "/bin/sh".to_owned())]
    } else {
        crate_config.apply_cmd_replace(args.command)
    };

    let exec_user_name = args.user.as_deref().unwrap_or(&current_user);
    let workdir = resolve_workdir(&client, &container_id, crate_config, &host_cwd, &resolved, args.workdir.as_deref(), exec_user_name)
        .await?;

    let reserved = ReservedEnv {
        id: name.to_string(),
        name: resolved.name.clone(),
        krate: resolved.name.clone(),
        project: resolved.project_root.to_string(),
        project_dir: resolved.project_root.to_string(),
    };
    let host_env: BTreeMap<String, String> = std::env::vars().collect();
    // The local per-user config in this workspace carries only the global
    // setup-script/tarball fields (no per-project/crate `env` matching
    // table); local-setup env is therefore always empty here.
    let local_env = BTreeMap::new();
    let env = wharfrat_docker::build_env(
        &reserved,
        &crate_config.env,
        &local_env,
        &host_env,
        &crate_config.env_whitelist,
        &crate_config.env_blacklist,
    );

    let stdin_tty = wharfrat_docker::is_tty(&std::io::stdin());
    let stdout_tty = wharfrat_docker::is_tty(&std::io::stdout());
    let both_tty = stdin_tty && stdout_tty;
    let needs_wrapper = wharfrat_docker::needs_proxy_wrapper(
        both_tty,
        &crate_config.groups,
        &crate_config.path_append,
        &crate_config.path_prepend,
    );
    let uid = nix::unistd::User::from_name(exec_user_name).ok().flatten().map(|u| u.uid.as_raw()).unwrap_or_else(|| nix::unistd::getuid().as_raw());
    let argv = if needs_wrapper {
        wharfrat_docker::wrap_argv(command, both_tty, uid, &crate_config.groups, &crate_config.path_append, &crate_config.path_prepend)
    } else {
        command
    };

    // When the proxy wrapper runs, it starts as root (so it can join
    // supplementary groups) and drops to `--uid` itself; otherwise the
    // engine is asked to run as the target user directly.
    let exec_user = if needs_wrapper { None } else { Some(exec_user_name) };

    let outcome = wharfrat_docker::exec_cmd(
        &client,
        wharfrat_docker::ExecRequest {
            container_id: &container_id,
            argv: argv.clone(),
            user: exec_user,
            env,
            workdir,
            tty: both_tty,
            extra_fds: &[],
            version: 2,
        },
    )
    .await
    .context("running command in container")?;

    crate::venv::update(&client, &container_id, crate_config, &resolved.name, args.user.as_deref(), &argv).await;

    if args.stop {
        wharfrat_docker::ensure_stopped(client.engine(), name.as_ref()).await?;
    }

    Ok(exit_code_from(outcome.exit_code))
}

async fn resolve_workdir(
    client: &Client,
    container_id: &str,
    crate_config: &wharfrat_config::Crate,
    host_cwd: &Utf8PathBuf,
    resolved: &wharfrat_config::ResolvedCrate,
    override_workdir: Option<&str>,
    exec_user: &str,
) -> Result<Option<String>> {
    let preference = override_workdir
        .map(str::to_owned)
        .or_else(|| crate_config.working_dir.clone())
        .unwrap_or_default();

    match wharfrat_docker::resolve_workdir(
        &preference,
        host_cwd.as_str(),
        resolved.project_root.as_str(),
        crate_config.project_mount.as_deref(),
    )? {
        wharfrat_docker::Workdir::Path(p) => Ok(Some(p)),
        wharfrat_docker::Workdir::Home => {
            let argv = vec!["/sbin/wr-init".to_owned(), "homedir".to_owned(), exec_user.to_owned()];
            let out = wharfrat_docker::get_output(client, container_id, &argv, None).await?;
            Ok(Some(String::from_utf8_lossy(&out).trim().to_owned()))
        }
    }
}

pub(super) fn build_create_request<'a>(
    resolved: &'a wharfrat_config::ResolvedCrate,
    labels: &'a Labels,
    current_user: &'a str,
) -> wharfrat_docker::CreateRequest<'a> {
    let uid = nix::unistd::getuid().as_raw();
    let gid = nix::unistd::getgid().as_raw();
    let gecos = nix::unistd::User::from_uid(nix::unistd::getuid())
        .ok()
        .flatten()
        .map(|u| u.gecos.to_string_lossy().into_owned())
        .unwrap_or_default();

    wharfrat_docker::CreateRequest {
        name: resolved.name.clone(),
        image: resolved.config.image.clone(),
        hostname: resolved.config.hostname.as_deref().unwrap_or("dev"),
        labels,
        mount_home: resolved.config.mount_home,
        project_root: resolved.project_root.as_str(),
        project_mount: resolved.config.project_mount.as_deref(),
        volumes: &resolved.config.volumes,
        tmpfs: &resolved.config.tmpfs,
        ports: &resolved.config.ports,
        network: resolved.config.network.as_deref(),
        cap_add: &resolved.config.cap_add,
        cap_drop: &resolved.config.cap_drop,
        copy_groups: &resolved.config.copy_groups,
        groups: &resolved.config.groups,
        username: current_user,
        uid,
        gid,
        gecos,
        setup_prep: resolved.config.setup_prep.as_deref(),
        setup_pre: resolved.config.setup_pre.as_deref(),
        setup_post: resolved.config.setup_post.as_deref(),
        tarballs: &resolved.config.tarballs,
    }
}

fn exit_code_from(code: i64) -> ExitCode {
    let byte = code.rem_euclid(256) as u8;
    ExitCode::from(byte)
}

/// The running tool's build commit — compiled in at build time via the
/// `VERGEN`-style `CARGO_PKG_VERSION` fallback (no VCS-info build script is
/// wired up in this workspace, so the crate version stands in for it).
fn tool_commit() -> String {
    env!("CARGO_PKG_VERSION").to_owned()
}
