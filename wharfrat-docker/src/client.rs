//! Typed facade over the container engine REST API. Everything that talks
//! bollard directly lives here; [`create`] and [`exec`] build on top of it
//! rather than reaching into bollard themselves.

use std::collections::HashMap;

use anyhow::{Context as _, Result};
use bollard::{
    container::{
        Config, CreateContainerOptions, DownloadFromContainerOptions, ListContainersOptions,
        RemoveContainerOptions, UploadToContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{ContainerInspectResponse, ContainerSummary},
    Docker,
};
use futures::StreamExt as _;
use wharfrat_config::WrError;

/// A thin, owned wrapper around the bollard connection. Cloning is cheap —
/// bollard's `Docker` is itself a handle over a shared transport.
#[derive(Clone)]
pub struct Client {
    docker: Docker,
}

impl Client {
    /// Connects using the engine's standard local defaults (Unix socket on
    /// Linux), or the URL override from [`wharfrat_config::LocalConfig`].
    pub fn connect(docker_url: Option<&str>) -> Result<Client> {
        let docker = match docker_url {
            Some(url) => Docker::connect_with_local(url, 120, bollard::API_DEFAULT_VERSION)
                .with_context(|| format!("connecting to docker at {url}"))?,
            None => Docker::connect_with_local_defaults()
                .context("connecting to docker engine")?,
        };
        Ok(Client { docker })
    }

    #[must_use]
    pub fn engine(&self) -> &Docker {
        &self.docker
    }

    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| WrError::EngineUnavailable(e.to_string()).into()).map(|_| ())
    }

    /// Looks up an image's id, `None` if it doesn't exist locally.
    pub async fn image_id(&self, reference: &str) -> Result<Option<String>> {
        match self.docker.inspect_image(reference).await {
            Ok(image) => Ok(image.id),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("inspecting image {reference}")),
        }
    }

    /// Pulls `reference`, using `auth` if the registry requires it.
    /// Progress is logged at debug level rather than surfaced, matching the
    /// original's plain log-as-you-go streamed pull.
    pub async fn pull_image(
        &self,
        reference: &str,
        auth: Option<bollard::auth::DockerCredentials>,
    ) -> Result<()> {
        let options = CreateImageOptions { from_image: reference, ..Default::default() };
        let mut stream = self.docker.create_image(Some(options), None, auth);
        while let Some(progress) = stream.next().await {
            let info = progress.map_err(|e| WrError::PullFailed(reference.to_owned(), e.to_string()))?;
            if let Some(status) = info.status {
                log::debug!("pull {reference}: {status}");
            }
        }
        Ok(())
    }

    pub async fn create_container(
        &self,
        name: &str,
        config: Config<String>,
    ) -> Result<String> {
        let options = CreateContainerOptions { name, platform: None };
        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .with_context(|| format!("creating container {name}"))?;
        Ok(response.id)
    }

    pub async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<bollard::container::StartContainerOptions<String>>)
            .await
            .with_context(|| format!("starting container {id}"))
    }

    /// Uploads a tar stream to the container's filesystem, rooted at `path`.
    pub async fn upload_to_container(&self, id: &str, path: &str, tar: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions { path, ..Default::default() };
        self.docker
            .upload_to_container(id, Some(options), tar.into())
            .await
            .with_context(|| format!("uploading to {id}:{path}"))
    }

    pub async fn download_from_container(&self, id: &str, path: &str) -> Result<Vec<u8>> {
        let options = DownloadFromContainerOptions { path };
        let mut stream = self.docker.download_from_container(id, Some(options));
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk.with_context(|| format!("downloading {id}:{path}"))?);
        }
        Ok(out)
    }

    /// Every container wearing a `rat.wharf.project` label, running or not —
    /// the source list for `list` and `prune`.
    pub async fn list_wharfrat_containers(&self) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_owned(), vec!["rat.wharf.project".to_owned()]);
        let options = ListContainersOptions { all: true, filters, ..Default::default() };
        self.docker.list_containers(Some(options)).await.context("listing containers")
    }

    /// Full inspect response, `None` if the engine has no such container.
    pub async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInspectResponse>> {
        match self.docker.inspect_container(name, None).await {
            Ok(details) => Ok(Some(details)),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(None),
            Err(e) => Err(e).with_context(|| format!("inspecting container {name}")),
        }
    }

    pub async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        self.docker
            .remove_container(id, Some(RemoveContainerOptions { force, ..Default::default() }))
            .await
            .with_context(|| format!("removing container {id}"))
    }

    /// Runs `argv` to completion inside `id` and collects stdout/stderr —
    /// used by the provisioning scripts and by the venv feature's binary
    /// search, neither of which need streaming or a TTY.
    pub async fn run_and_collect(
        &self,
        id: &str,
        argv: &[String],
        user: Option<&str>,
        env: &HashMap<String, String>,
    ) -> Result<(i64, Vec<u8>, Vec<u8>)> {
        let env_vec: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            env: Some(env_vec),
            user: user.map(str::to_owned),
            ..Default::default()
        };
        let exec = self.docker.create_exec(id, options).await.context("creating provisioning exec")?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let start = self
            .docker
            .start_exec(&exec.id, Some(StartExecOptions { detach: false, ..Default::default() }))
            .await
            .context("starting provisioning exec")?;
        if let StartExecResults::Attached { mut output, .. } = start {
            while let Some(msg) = output.next().await {
                match msg.context("reading provisioning exec output")? {
                    bollard::container::LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                    bollard::container::LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await.context("inspecting provisioning exec")?;
        let code = inspect.exit_code.unwrap_or(-1);
        Ok((code, stdout, stderr))
    }
}
