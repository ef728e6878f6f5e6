//! `Create`: image pull, container create, self-archive copy, and the
//! provisioning pipeline (§4.3) — run once for the crate's own setup
//! scripts, then again for the local per-user config.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context as _, Result};
use bollard::{
    container::Config,
    models::{HostConfig, PortBinding},
};
use wharfrat_config::{container_name, Labels, LocalConfig, WrError};

use crate::{client::Client, context::Context, lifecycle, selfarchive};

const X11_BIND: &str = "/tmp/.X11-unix:/tmp/.X11-unix";
const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Everything `create` needs about the resolved crate, kept separate from
/// [`wharfrat_config::Crate`] so this module doesn't need to know about
/// project/branch resolution.
pub struct CreateRequest<'a> {
    pub name: String,
    pub image: String,
    pub hostname: &'a str,
    pub labels: &'a Labels,
    pub mount_home: bool,
    pub project_root: &'a str,
    pub project_mount: Option<&'a str>,
    pub volumes: &'a BTreeMap<String, String>,
    pub tmpfs: &'a BTreeMap<String, String>,
    pub ports: &'a [String],
    pub network: Option<&'a str>,
    pub cap_add: &'a [String],
    pub cap_drop: &'a [String],
    pub copy_groups: &'a [String],
    pub groups: &'a [String],
    pub username: &'a str,
    pub uid: u32,
    pub gid: u32,
    pub gecos: String,
    pub setup_prep: Option<&'a str>,
    pub setup_pre: Option<&'a str>,
    pub setup_post: Option<&'a str>,
    pub tarballs: &'a BTreeMap<String, String>,
}

fn container_config(req: &CreateRequest<'_>) -> Config<String> {
    let mut exposed_ports = HashMap::new();
    for port in req.ports {
        exposed_ports.insert(port.clone(), HashMap::new());
    }

    Config {
        image: Some(req.image.clone()),
        hostname: Some(req.hostname.to_owned()),
        user: Some("root:root".to_owned()),
        entrypoint: Some(Vec::new()),
        cmd: Some(vec!["/sbin/wr-init".to_owned(), "server".to_owned(), "--debug".to_owned()]),
        labels: Some(req.labels.as_map()),
        exposed_ports: if exposed_ports.is_empty() { None } else { Some(exposed_ports) },
        host_config: Some(host_config(req)),
        ..Default::default()
    }
}

fn host_config(req: &CreateRequest<'_>) -> HostConfig {
    let mut binds = vec![X11_BIND.to_owned()];
    if req.mount_home {
        binds.push("/home:/home".to_owned());
    }
    if let Some(mount) = req.project_mount {
        binds.push(format!("{}:{}", req.project_root, mount));
    }
    for (host_path, value) in req.volumes {
        binds.push(format!("{}:{}", resolve_volume_env(value, req), host_path));
    }

    let mut port_bindings = HashMap::new();
    for port in req.ports {
        port_bindings.insert(
            port.clone(),
            Some(vec![PortBinding { host_ip: None, host_port: None }]),
        );
    }

    HostConfig {
        binds: Some(binds),
        tmpfs: if req.tmpfs.is_empty() { None } else { Some(req.tmpfs.clone()) },
        port_bindings: if port_bindings.is_empty() { None } else { Some(port_bindings) },
        cap_add: if req.cap_add.is_empty() { None } else { Some(req.cap_add.to_vec()) },
        cap_drop: if req.cap_drop.is_empty() { None } else { Some(req.cap_drop.to_vec()) },
        network_mode: req.network.map(str::to_owned),
        // The engine treats a null DNS list differently from an empty one;
        // an explicit empty list is required to avoid inheriting the host's.
        dns: Some(Vec::new()),
        ..Default::default()
    }
}

/// Expands `WHARFRAT_*` references in a volume spec against the values
/// this create request already knows, falling back to the host
/// environment for anything else — mirrors the resolver described in §4.3.
fn resolve_volume_env(value: &str, req: &CreateRequest<'_>) -> String {
    let mut out = value.replace("${WHARFRAT_PROJECT_DIR}", req.project_root).replace("${WHARFRAT_NAME}", &req.name);
    for (key, val) in std::env::vars() {
        out = out.replace(&format!("${{{key}}}"), &val);
    }
    out
}

/// Runs the full create+provision pipeline and returns the new container's
/// id. Called by [`crate::lifecycle::ensure_running`] only when a fresh
/// container is actually needed.
pub async fn create(client: &Client, ctx: &Context, req: CreateRequest<'_>) -> Result<String> {
    let name = container_name(&req.labels.project, &req.labels.krate, &req.labels.branch, &req.labels.user);
    let config = container_config(&req);

    let id = match client.create_container(name.as_ref(), config.clone()).await {
        Ok(id) => id,
        Err(e) if is_image_not_found(&e) => {
            client
                .pull_image(&req.image, pull_credentials(&req.image))
                .await
                .map_err(|e| WrError::PullFailed(req.image.clone(), e.to_string()))?;
            client.create_container(name.as_ref(), config).await?
        }
        Err(e) => return Err(e),
    };

    if let Err(e) = provision(client, ctx, &id, &req).await {
        lifecycle::ensure_removed(client.engine(), name.as_ref())
            .await
            .context("rolling back failed create")?;
        return Err(WrError::ProvisionFailed(name.to_string(), e.to_string()).into());
    }

    ctx.run_after_create_hooks(&id);
    Ok(id)
}

fn is_image_not_found(err: &anyhow::Error) -> bool {
    err.to_string().contains("No such image") || err.to_string().contains("404")
}

/// The registry host an image reference pulls from, e.g. `ghcr.io` for
/// `ghcr.io/org/app:tag`; a reference with no host segment (`ubuntu:20.04`,
/// `myorg/myapp`) pulls from the default index — mirrors
/// `registry.ParseRepositoryInfo`/`ConvertToHostname`.
fn registry_host(image: &str) -> &str {
    let first_segment = image.split('/').next().unwrap_or(image);
    let has_host_marker = first_segment.contains('.') || first_segment.contains(':') || first_segment == "localhost";
    if has_host_marker && image.contains('/') {
        first_segment
    } else {
        DEFAULT_REGISTRY
    }
}

/// Looks up a saved `login` credential for `image`'s registry, if any.
fn pull_credentials(image: &str) -> Option<bollard::auth::DockerCredentials> {
    let dir = wharfrat_config::config_dir();
    let auth = wharfrat_config::AuthCache::load(&dir).ok()?;
    let cred = auth.get(registry_host(image))?;
    Some(bollard::auth::DockerCredentials {
        username: Some(cred.username),
        password: Some(cred.password),
        serveraddress: Some(cred.server_address),
        ..Default::default()
    })
}

async fn provision(client: &Client, ctx: &Context, id: &str, req: &CreateRequest<'_>) -> Result<()> {
    let self_exe = selfarchive::read_self_exe().await?;
    let archive = selfarchive::build(&self_exe).await?;
    client.upload_to_container(id, "/", archive).await.context("copying self-archive")?;

    client.start_container(id).await?;

    setup_user(client, id, req).await?;

    let config_dir = ctx.local_config_dir.as_str();

    run_setup_round(
        client,
        id,
        req.project_root,
        req.project_root,
        config_dir,
        &req.labels.krate,
        req.setup_prep,
        req.setup_pre,
        req.setup_post,
        req.tarballs,
    )
    .await
    .context("crate provisioning round")?;

    let local = &ctx.local_config;
    run_setup_round(
        client,
        id,
        config_dir,
        req.project_root,
        config_dir,
        &req.labels.krate,
        local.setup_prep.as_deref(),
        local.setup_pre.as_deref(),
        local.setup_post.as_deref(),
        &local.tarballs,
    )
    .await
    .context("local per-user provisioning round")?;

    Ok(())
}

async fn setup_user(client: &Client, id: &str, req: &CreateRequest<'_>) -> Result<()> {
    let mut argv = vec![
        "/sbin/wr-init".to_owned(),
        "setup".to_owned(),
        format!("--user={}", req.username),
        format!("--uid={}", req.uid),
        format!("--gecos={}", req.gecos),
        format!("--gid={}", req.gid),
    ];
    for group in req.copy_groups {
        argv.push(format!("--create-group={group}"));
    }
    for group in req.groups {
        argv.push(format!("--extra-group={group}"));
    }
    if !req.mount_home {
        argv.push("--mkhome".to_owned());
    }
    let (code, _out, err) = client.run_and_collect(id, &argv, None, &HashMap::new()).await?;
    if code != 0 {
        anyhow::bail!("wr-init setup exited {code}: {}", String::from_utf8_lossy(&err));
    }
    Ok(())
}

/// `base` is the setup-prep cwd and the tarball source base — the crate
/// provisioning round uses the project root, the local per-user round uses
/// the local config directory. `project_root`/`config_dir` feed the
/// `WR_EXT_*` environment instead, which stays the same across both rounds.
#[allow(clippy::too_many_arguments)]
async fn run_setup_round(
    client: &Client,
    id: &str,
    base: &str,
    project_root: &str,
    config_dir: &str,
    crate_name: &str,
    setup_prep: Option<&str>,
    setup_pre: Option<&str>,
    setup_post: Option<&str>,
    tarballs: &BTreeMap<String, String>,
) -> Result<()> {
    if let Some(script) = setup_prep {
        let env = BTreeMap::new();
        let out = wharfrat_config::run_host_script(
            script,
            &[project_root, crate_name],
            camino::Utf8Path::new(base),
            &env,
            "/bin/sh",
        )
        .context("running setup-prep")?;
        if !out.status.success() {
            anyhow::bail!("setup-prep exited {}: {}", out.status, String::from_utf8_lossy(&out.stderr));
        }
    }

    if let Some(script) = setup_pre {
        run_in_container_script(client, id, project_root, config_dir, crate_name, script).await.context("setup-pre")?;
    }

    for (src, dst) in tarballs {
        let src_path = if std::path::Path::new(src).is_absolute() {
            src.clone()
        } else {
            format!("{base}/{src}")
        };
        anyhow::ensure!(dst.starts_with('/'), "tarball destination {dst:?} must be absolute");
        let data = tokio::fs::read(&src_path).await.with_context(|| format!("reading tarball {src_path}"))?;
        client.upload_to_container(id, dst, data).await.with_context(|| format!("installing tarball to {dst}"))?;
    }

    if let Some(script) = setup_post {
        run_in_container_script(client, id, project_root, config_dir, crate_name, script).await.context("setup-post")?;
    }

    Ok(())
}

async fn run_in_container_script(
    client: &Client,
    id: &str,
    project_root: &str,
    config_dir: &str,
    crate_name: &str,
    script: &str,
) -> Result<()> {
    let mut env = HashMap::new();
    env.insert("WR_EXT_USER".to_owned(), whoami_user());
    env.insert("WR_EXT_GROUP".to_owned(), whoami_group());
    env.insert("WR_EXT_PROJECT".to_owned(), project_root.to_owned());
    env.insert("WR_EXT_CONFIG".to_owned(), config_dir.to_owned());
    env.insert("WR_CRATE".to_owned(), crate_name.to_owned());

    let trimmed = script.trim_start();
    let argv: Vec<String> = if let Some(rest) = trimmed.strip_prefix("#!") {
        let (shebang, _) = rest.split_once('\n').unwrap_or((rest, ""));
        shell_words::split(shebang.trim()).context("parsing in-container shebang")?
    } else {
        vec!["/bin/sh".to_owned(), "-c".to_owned(), script.to_owned()]
    };

    let (code, _out, err) = client.run_and_collect(id, &argv, None, &env).await?;
    anyhow::ensure!(code == 0, "script exited {code}: {}", String::from_utf8_lossy(&err));
    Ok(())
}

fn whoami_user() -> String {
    nix::unistd::User::from_uid(nix::unistd::getuid()).ok().flatten().map(|u| u.name).unwrap_or_default()
}

fn whoami_group() -> String {
    nix::unistd::Group::from_gid(nix::unistd::getgid()).ok().flatten().map(|g| g.name).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_reference_uses_default_index() {
        assert_eq!(registry_host("ubuntu:20.04"), DEFAULT_REGISTRY);
        assert_eq!(registry_host("myorg/myapp"), DEFAULT_REGISTRY);
    }

    #[test]
    fn hosted_reference_uses_its_own_registry() {
        assert_eq!(registry_host("ghcr.io/org/app:tag"), "ghcr.io");
        assert_eq!(registry_host("myregistry.io:5000/team/app:tag"), "myregistry.io:5000");
        assert_eq!(registry_host("localhost:5000/app"), "localhost:5000");
    }
}
