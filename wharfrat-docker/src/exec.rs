//! Host-side exec driver (§4.4): working-directory resolution, env
//! construction, the proxy-wrapper decision, and the two transports
//! (legacy v1, default v2) that actually run a command inside the
//! container and propagate its exit code.

use std::collections::BTreeMap;
use std::os::fd::AsRawFd as _;

use anyhow::{Context as _, Result};
use bollard::{
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    container::LogOutput,
};
use futures::StreamExt as _;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, ReadBuf};
use wharfrat_config::WrError;
use wharfrat_mux::Mux;

use crate::client::Client;

pub const STDIN_CHANNEL: u32 = 2;
pub const STDOUT_CHANNEL: u32 = 3;
pub const STDERR_CHANNEL: u32 = 4;
const FIRST_EXTRA_CHANNEL: u32 = 5;

pub struct ExecOutcome {
    pub exit_code: i64,
}

pub struct ExecRequest<'a> {
    pub container_id: &'a str,
    pub argv: Vec<String>,
    pub user: Option<&'a str>,
    pub env: BTreeMap<String, String>,
    pub workdir: Option<String>,
    pub tty: bool,
    pub extra_fds: &'a [i32],
    pub version: u8,
}

/// The outcome of walking a `working-dir` preference list: either a path
/// resolved on the spot, or `Home`, signalling that the caller must still
/// run `wr-init homedir <user>` inside the container to finish resolving
/// the entry that won — this function has no container to ask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workdir {
    Path(String),
    Home,
}

/// §4.4's working-directory preference list: `crate.working-dir` split on
/// commas, each entry tried in order, first one that resolves wins. `home`
/// is a valid entry like any other — it "resolves" immediately as far as
/// this ordered walk is concerned (the actual lookup happens afterwards),
/// so its position among the other preferences is respected.
pub fn resolve_workdir(
    preferences: &str,
    host_cwd: &str,
    project_root: &str,
    project_mount: Option<&str>,
) -> Result<Workdir> {
    for raw in preferences.split(',') {
        let pref = raw.trim();
        if pref.is_empty() || pref.eq_ignore_ascii_case("match") {
            return Ok(Workdir::Path(host_cwd.to_owned()));
        }
        if pref == "project" {
            let mount = project_mount.context("project-mount not set, but working-dir=project requested")?;
            let relative = host_cwd
                .strip_prefix(project_root)
                .context("current directory is not inside the project")?;
            return Ok(Workdir::Path(format!("{mount}{relative}")));
        }
        if pref == "home" {
            return Ok(Workdir::Home);
        }
        if pref.starts_with('/') {
            return Ok(Workdir::Path(pref.to_owned()));
        }
    }
    Ok(Workdir::Path(host_cwd.to_owned()))
}

/// Decides whether the legacy `wr-init proxy` wrapper must be prepended:
/// both stdio fds are TTYs, supplementary groups are set, or PATH
/// append/prepend is configured.
#[must_use]
pub fn needs_proxy_wrapper(both_tty: bool, groups: &[String], path_append: &[String], path_prepend: &[String]) -> bool {
    both_tty || !groups.is_empty() || !path_append.is_empty() || !path_prepend.is_empty()
}

#[must_use]
pub fn wrap_argv(argv: Vec<String>, sync: bool, uid: u32, groups: &[String], path_append: &[String], path_prepend: &[String]) -> Vec<String> {
    let mut wrapped = vec!["/sbin/wr-init".to_owned(), "proxy".to_owned(), format!("--uid={uid}")];
    if sync {
        wrapped.push("--sync".to_owned());
    }
    for group in groups {
        wrapped.push(format!("--group={group}"));
    }
    for path in path_prepend {
        wrapped.push(format!("--prepend-path={path}"));
    }
    for path in path_append {
        wrapped.push(format!("--append-path={path}"));
    }
    wrapped.extend(argv);
    wrapped
}

/// Runs `req.argv` inside the container and returns its exit code. Picks
/// the v1 or v2 transport per `req.version` (2 is the default everywhere
/// except scripted `wr-exec` invocations that pin an older version).
pub async fn exec_cmd(client: &Client, req: ExecRequest<'_>) -> Result<ExecOutcome> {
    match req.version {
        1 => exec_v1(client, req).await,
        2 => exec_v2(client, req).await,
        other => anyhow::bail!("unknown exec version: {other}"),
    }
}

/// Non-interactive helper used by provisioning and the venv binary search:
/// runs `argv`, collects stdout, discards stderr on success.
pub async fn get_output(client: &Client, id: &str, argv: &[String], user: Option<&str>) -> Result<Vec<u8>> {
    let (code, stdout, stderr) = client.run_and_collect(id, argv, user, &std::collections::HashMap::new()).await?;
    if code != 0 {
        anyhow::bail!(WrError::ExecSetupFailed(format!(
            "{argv:?} exited {code}: {}",
            String::from_utf8_lossy(&stderr)
        )));
    }
    Ok(stdout)
}

/// v2 (default): engine exec with `Tty=false`; the exec's stdout carries
/// the in-container `wr-init exec`'s mux-framed byte stream (stderr is
/// expected empty — the in-container init redirects its own logging to a
/// file precisely so it never lands on this stream). RPC on channel 0
/// wires stdin/stdout/stderr, then any inherited extra fds, then `Start`.
async fn exec_v2(client: &Client, req: ExecRequest<'_>) -> Result<ExecOutcome> {
    let mut argv = vec!["/sbin/wr-init".to_owned(), "exec".to_owned()];
    argv.extend(req.argv.iter().cloned());

    let env_vec: Vec<String> = req.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let options = CreateExecOptions {
        cmd: Some(argv),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        env: Some(env_vec),
        user: req.user.map(str::to_owned),
        working_dir: req.workdir.clone(),
        ..Default::default()
    };
    let exec = client.engine().create_exec(req.container_id, options).await.context("creating exec")?;

    let start = client
        .engine()
        .start_exec(&exec.id, Some(StartExecOptions { detach: false, tty: Some(false), ..Default::default() }))
        .await
        .context("starting exec")?;
    let StartExecResults::Attached { output, input } = start else {
        anyhow::bail!("engine did not attach to non-detached exec");
    };

    let mux_reader = StdcopyReader::new(output);
    let (mux, demux) = Mux::new(mux_reader, input);
    let rpc = wharfrat_rpc::Client::new(&mux);

    mux.recv(STDOUT_CHANNEL, tokio::io::stdout());
    mux.recv(STDERR_CHANNEL, tokio::io::stderr());
    let stdin_writer = mux.send(STDIN_CHANNEL);

    rpc.input(STDIN_CHANNEL, 0).await.context("RPC Input")?;
    rpc.output(STDOUT_CHANNEL, 1).await.context("RPC Output(stdout)")?;
    rpc.output(STDERR_CHANNEL, 2).await.context("RPC Output(stderr)")?;

    let mut extra_channels = Vec::new();
    for (i, fd) in req.extra_fds.iter().enumerate() {
        let channel = FIRST_EXTRA_CHANNEL + i as u32;
        rpc.io(channel, *fd).await.context("RPC IO")?;
        extra_channels.push((channel, *fd));
    }

    let stdin_task = tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stdin_writer.write(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = stdin_writer.close().await;
    });

    rpc.start().await.context("RPC Start")?;

    let mut signals = signal_hook_tokio::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
        signal_hook::consts::SIGHUP,
        signal_hook::consts::SIGQUIT,
    ])
    .context("installing signal handler")?;
    let signal_handle = signals.handle();
    let rpc_signal_loop = std::sync::Arc::new(rpc);
    let signal_task = tokio::spawn(async move {
        use futures::stream::StreamExt as _;
        while let Some(signum) = signals.next().await {
            if rpc_signal_loop.signal(signum).await.is_err() {
                break;
            }
        }
    });

    demux.process().await.context("mux demultiplex loop")?;
    signal_handle.close();
    let _ = stdin_task.await;
    let _ = signal_task.await;

    let inspect = client.engine().inspect_exec(&exec.id).await.context("inspecting exec result")?;
    Ok(ExecOutcome { exit_code: inspect.exit_code.unwrap_or(-1) })
}

/// v1 (legacy): `Tty = both_tty`. When TTY, raw mode plus the
/// `PROXY READY`/`PROXY RUN` handshake with `wr-init proxy` is the
/// caller's responsibility (terminal raw-mode handling lives at the CLI
/// layer, not here); this function only drives the engine's attach
/// stream. When non-TTY, the engine's own stdcopy framing already
/// separates stdout/stderr, so stdin/stdout/stderr are copied directly
/// with no mux involved.
async fn exec_v1(client: &Client, req: ExecRequest<'_>) -> Result<ExecOutcome> {
    let env_vec: Vec<String> = req.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let options = CreateExecOptions {
        cmd: Some(req.argv.clone()),
        attach_stdin: Some(true),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(req.tty),
        env: Some(env_vec),
        user: req.user.map(str::to_owned),
        working_dir: req.workdir.clone(),
        ..Default::default()
    };
    let exec = client.engine().create_exec(req.container_id, options).await.context("creating exec")?;

    let start = client
        .engine()
        .start_exec(&exec.id, Some(StartExecOptions { detach: false, tty: Some(req.tty), ..Default::default() }))
        .await
        .context("starting exec")?;
    let StartExecResults::Attached { mut output, mut input } = start else {
        anyhow::bail!("engine did not attach to non-detached exec");
    };

    if req.tty {
        // PROXY READY / PROXY RUN handshake: read the literal marker line,
        // then send the run marker before streaming user data.
        let mut marker = Vec::new();
        while let Some(chunk) = output.next().await {
            let chunk = chunk.context("reading proxy handshake")?;
            let bytes = log_output_bytes(&chunk);
            marker.extend_from_slice(bytes);
            if marker.ends_with(b"PROXY READY\n") {
                break;
            }
        }
        input.write_all(b"PROXY RUN\n").await.context("sending proxy run marker")?;
    }

    let stdin_task = tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if input.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = input.shutdown().await;
    });

    while let Some(chunk) = output.next().await {
        let chunk = chunk.context("reading exec output")?;
        match chunk {
            LogOutput::StdOut { message } => {
                tokio::io::stdout().write_all(&message).await.ok();
            }
            LogOutput::StdErr { message } => {
                tokio::io::stderr().write_all(&message).await.ok();
            }
            LogOutput::Console { message } => {
                tokio::io::stdout().write_all(&message).await.ok();
            }
            LogOutput::StdIn { .. } => {}
        }
    }
    let _ = stdin_task.await;

    let inspect = client.engine().inspect_exec(&exec.id).await.context("inspecting exec result")?;
    Ok(ExecOutcome { exit_code: inspect.exit_code.unwrap_or(-1) })
}

fn log_output_bytes(chunk: &LogOutput) -> &[u8] {
    match chunk {
        LogOutput::StdOut { message } | LogOutput::StdErr { message } | LogOutput::Console { message } | LogOutput::StdIn { message } => {
            message.as_ref()
        }
    }
}

/// Adapts bollard's demuxed exec output stream into a plain `AsyncRead` —
/// the "one pipe reader becomes the mux input" step of §4.4's v2
/// description. stdout and stderr bytes are concatenated in arrival order;
/// `wr-init exec` never writes to its own stderr once it has redirected
/// its logging away from the stream.
struct StdcopyReader<S> {
    stream: S,
    pending: std::collections::VecDeque<u8>,
}

impl<S> StdcopyReader<S> {
    fn new(stream: S) -> Self {
        Self { stream, pending: std::collections::VecDeque::new() }
    }
}

impl<S> AsyncRead for StdcopyReader<S>
where
    S: futures::Stream<Item = Result<LogOutput, bollard::errors::Error>> + Unpin,
{
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if self.pending.is_empty() {
            match futures::Stream::poll_next(std::pin::Pin::new(&mut self.stream), cx) {
                std::task::Poll::Ready(Some(Ok(chunk))) => {
                    self.pending.extend(log_output_bytes(&chunk).iter().copied());
                }
                std::task::Poll::Ready(Some(Err(e))) => {
                    return std::task::Poll::Ready(Err(std::io::Error::other(e)));
                }
                std::task::Poll::Ready(None) => return std::task::Poll::Ready(Ok(())),
                std::task::Poll::Pending => return std::task::Poll::Pending,
            }
        }
        let n = buf.remaining().min(self.pending.len());
        for _ in 0..n {
            buf.put_slice(&[self.pending.pop_front().expect("checked len")]);
        }
        std::task::Poll::Ready(Ok(()))
    }
}

/// Whether `fd` refers to an open TTY — used to decide raw-mode handling
/// and whether `needs_proxy_wrapper`'s `both_tty` input should be true.
#[must_use]
pub fn is_tty(fd: &impl AsRawFd) -> bool {
    nix::unistd::isatty(fd.as_raw_fd()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn project_before_home_is_tried_first_when_listed_first() {
        let got = resolve_workdir("project,home", "/src/proj/sub", "/src/proj", Some("/work")).unwrap();
        assert_eq!(got, Workdir::Path("/work/sub".to_owned()));
    }

    #[test]
    fn home_before_project_wins_when_listed_first() {
        let got = resolve_workdir("home,project", "/src/proj/sub", "/src/proj", Some("/work")).unwrap();
        assert_eq!(got, Workdir::Home);
    }

    #[test]
    fn absolute_path_entry_wins_verbatim() {
        let got = resolve_workdir("/opt/app", "/src/proj", "/src/proj", None).unwrap();
        assert_eq!(got, Workdir::Path("/opt/app".to_owned()));
    }

    #[test]
    fn empty_preference_falls_back_to_host_cwd() {
        let got = resolve_workdir("", "/src/proj", "/src/proj", None).unwrap();
        assert_eq!(got, Workdir::Path("/src/proj".to_owned()));
    }
}
