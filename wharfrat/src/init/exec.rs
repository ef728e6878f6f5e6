//! `wr-init exec`: the in-container half of the v2 transport. Wraps its own
//! stdin/stdout in the multiplexer, runs an RPC server on channel 0 that
//! records the desired stream wiring, spawns the child once `Start` fires,
//! and propagates its exit status as this process's own.

use std::os::fd::{AsRawFd as _, OwnedFd};
use std::process::{ExitCode, Stdio};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, bail, Context as _, Result};
use nix::sys::signal::{self, Signal};
use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWriteExt as _};
use tokio::process::Command;
use tokio::sync::mpsc;
use wharfrat_mux::{ChannelWriter, Mux};
use wharfrat_rpc::{Handler, Server};

const LOG_PATH: &str = "/wr-init.log";

pub async fn run(argv: &[String]) -> Result<ExitCode> {
    redirect_log();
    if argv.is_empty() {
        bail!("wr-init exec requires a command to run");
    }

    let (mux, demux) = Mux::new(tokio::io::stdin(), tokio::io::stdout());
    tokio::spawn(demux.process());

    let handler = ExecHandler::default();
    let pending = handler.pending.clone();
    let child_pid = handler.child_pid.clone();

    let (started_tx, mut started_rx) = mpsc::channel(1);
    let server = Server::new(&mux);
    tokio::spawn(server.serve(handler, Some(started_tx)));

    started_rx.recv().await.context("control channel closed before Start")?;

    let wiring = { pending.lock().expect("lock").clone() };
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]);

    let mut copy_tasks = Vec::new();

    match wiring.stdin_channel {
        Some(id) => {
            let (read_fd, write_fd) = make_pipe()?;
            command.stdin(Stdio::from(read_fd));
            mux.recv(id, tokio_file(write_fd));
        }
        None => {
            command.stdin(Stdio::null());
        }
    }

    if let Some(id) = wiring.stdout_channel {
        let (read_fd, write_fd) = make_pipe()?;
        command.stdout(Stdio::from(write_fd));
        copy_tasks.push(tokio::spawn(copy_to_channel(tokio_file(read_fd), mux.send(id))));
    } else {
        command.stdout(Stdio::null());
    }

    if let Some(id) = wiring.stderr_channel {
        let (read_fd, write_fd) = make_pipe()?;
        command.stderr(Stdio::from(write_fd));
        copy_tasks.push(tokio::spawn(copy_to_channel(tokio_file(read_fd), mux.send(id))));
    } else {
        command.stderr(Stdio::null());
    }

    for (id, fd) in wiring.io {
        let (local, remote) = make_socketpair()?;
        // SAFETY: only async-signal-safe syscalls run between fork and exec
        // in this closure (dup2), matching `Command::pre_exec`'s contract.
        unsafe {
            command.pre_exec(move || {
                nix::unistd::dup2(remote.as_raw_fd(), fd).map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        let local_file = std::fs::File::from(local);
        let local_file_read = local_file.try_clone().context("cloning io socket fd")?;
        mux.recv(id, tokio::fs::File::from_std(local_file));
        copy_tasks.push(tokio::spawn(copy_to_channel(tokio::fs::File::from_std(local_file_read), mux.send(id))));
    }

    let mut child = command.spawn().context("spawning child")?;
    if let Some(pid) = child.id() {
        *child_pid.lock().expect("lock") = Some(Pid::from_raw(pid as i32));
    }

    let status = child.wait().await.context("waiting for child")?;
    for task in copy_tasks {
        let _ = task.await;
    }

    let code = status.code().unwrap_or(-1);
    Ok(ExitCode::from(code.rem_euclid(256) as u8))
}

#[derive(Default, Clone)]
struct PendingWiring {
    stdin_channel: Option<u32>,
    stdout_channel: Option<u32>,
    stderr_channel: Option<u32>,
    io: Vec<(u32, i32)>,
}

#[derive(Default, Clone)]
struct ExecHandler {
    pending: Arc<StdMutex<PendingWiring>>,
    child_pid: Arc<StdMutex<Option<Pid>>>,
}

impl Handler for ExecHandler {
    fn input(&mut self, id: u32, fd: i32) -> Result<()> {
        if fd != 0 {
            bail!("unsupported input fd {fd}");
        }
        self.pending.lock().expect("lock").stdin_channel = Some(id);
        Ok(())
    }

    fn output(&mut self, id: u32, fd: i32) -> Result<()> {
        let mut pending = self.pending.lock().expect("lock");
        match fd {
            1 => pending.stdout_channel = Some(id),
            2 => pending.stderr_channel = Some(id),
            other => bail!("unsupported output fd {other}"),
        }
        Ok(())
    }

    fn io(&mut self, id: u32, fd: i32) -> Result<()> {
        self.pending.lock().expect("lock").io.push((id, fd));
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn signal(&mut self, signum: i32) -> Result<()> {
        let Some(pid) = *self.child_pid.lock().expect("lock") else { return Ok(()) };
        let sig = Signal::try_from(signum).map_err(|e| anyhow!("invalid signal {signum}: {e}"))?;
        signal::kill(pid, sig).map_err(|e| anyhow!("delivering signal {signum}: {e}"))?;
        Ok(())
    }
}

async fn copy_to_channel<R: AsyncRead + Unpin>(mut reader: R, writer: ChannelWriter) {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if writer.write(&buf[..n]).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = writer.close().await;
}

fn make_pipe() -> Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe().context("creating pipe")
}

fn make_socketpair() -> Result<(OwnedFd, OwnedFd)> {
    socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::empty()).context("creating socketpair")
}

fn tokio_file(fd: OwnedFd) -> tokio::fs::File {
    tokio::fs::File::from_std(std::fs::File::from(fd))
}

/// §4.7/§7: this process's own logging must never reach stdout (it IS the
/// mux transport) or, while handshaking, a TTY stream, so it goes to a file
/// instead of `env_logger`'s stderr default.
fn redirect_log() {
    let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(LOG_PATH) else { return };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init();
}
