//! The control protocol carried on channel 0 of a `wharfrat-mux` connection.
//!
//! Requests and responses are newline-delimited JSON values, one request
//! outstanding at a time per client — mirroring the Go side's use of
//! `net/rpc`, without dragging in a generic RPC framework for five methods.

use std::collections::HashMap;

use anyhow::{anyhow, bail, Context as _, Result};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::{mpsc, oneshot, Mutex},
};
use wharfrat_mux::{ChannelWriter, Mux};

/// Control-channel id. Fixed by the transport: RPC always rides channel 0.
pub const CONTROL_CHANNEL: u32 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "args")]
pub enum Request {
    /// Wire channel `id` as the input for the child's fd `fd` (`fd == 0` is stdin).
    Input { id: u32, fd: i32 },
    /// Wire channel `id` as output for the child's fd `fd` (1 or 2).
    Output { id: u32, fd: i32 },
    /// Allocate a socketpair inside the container for an inherited extra fd,
    /// bridging one end to channel `id`.
    Io { id: u32, fd: i32 },
    /// Unblock the pre-exec wait gate.
    Start,
    /// Deliver a signal to the child; a no-op if it hasn't started yet.
    Signal { signum: i32 },
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::Input { .. } => "Input",
            Request::Output { .. } => "Output",
            Request::Io { .. } => "IO",
            Request::Start => "Start",
            Request::Signal { .. } => "Signal",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    id: u64,
    #[serde(flatten)]
    request: Request,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReplyEnvelope {
    id: u64,
    error: Option<String>,
}

/// The far-side handle used by the process that drives an exec: wires up
/// channels and signals, then starts the child.
pub struct Client {
    writer: ChannelWriter,
    pending: std::sync::Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), String>>>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Client {
    /// Opens the control channel on `mux` and spawns the task that reads
    /// replies off it. `mux` must already have its `Demux::process()` task
    /// running.
    #[must_use]
    pub fn new(mux: &Mux) -> Self {
        let (writer, mut reader) = mux.connect(CONTROL_CHANNEL);
        let pending: std::sync::Arc<Mutex<HashMap<u64, oneshot::Sender<Result<(), String>>>>> =
            Default::default();
        let pending_for_task = pending.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(&mut reader).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Ok(reply) = serde_json::from_str::<ReplyEnvelope>(&line) else {
                            log::warn!("rpc client: malformed reply: {line}");
                            continue;
                        };
                        let tx = pending_for_task.lock().await.remove(&reply.id);
                        if let Some(tx) = tx {
                            let result = match reply.error {
                                None => Ok(()),
                                Some(msg) => Err(msg),
                            };
                            let _ = tx.send(result);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("rpc client: read error: {e}");
                        break;
                    }
                }
            }
        });
        Self { writer, pending, next_id: std::sync::atomic::AtomicU64::new(1) }
    }

    pub async fn input(&self, id: u32, fd: i32) -> Result<()> {
        self.call(Request::Input { id, fd }).await
    }

    pub async fn output(&self, id: u32, fd: i32) -> Result<()> {
        self.call(Request::Output { id, fd }).await
    }

    pub async fn io(&self, id: u32, fd: i32) -> Result<()> {
        self.call(Request::Io { id, fd }).await
    }

    pub async fn start(&self) -> Result<()> {
        self.call(Request::Start).await
    }

    pub async fn signal(&self, signum: i32) -> Result<()> {
        self.call(Request::Signal { signum }).await
    }

    async fn call(&self, request: Request) -> Result<()> {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let name = request.name();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let envelope = Envelope { id, request };
        let mut line = serde_json::to_vec(&envelope).context("encoding rpc request")?;
        line.push(b'\n');
        self.writer.write(&line).await.with_context(|| format!("sending {name} request"))?;

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(msg)) => bail!("{name} rejected: {msg}"),
            Err(_) => bail!("{name}: control channel closed before a reply arrived"),
        }
    }
}

/// The handlers the in-container init implements for each request kind.
/// `Server::serve` dispatches one call at a time, matching the protocol's
/// single-outstanding-request-per-channel design.
pub trait Handler: Send {
    fn input(&mut self, id: u32, fd: i32) -> Result<()>;
    fn output(&mut self, id: u32, fd: i32) -> Result<()>;
    fn io(&mut self, id: u32, fd: i32) -> Result<()>;
    /// Returning `Ok(())` unblocks the pre-exec wait gate; a repeat call
    /// after the gate already opened must return an error.
    fn start(&mut self) -> Result<()>;
    fn signal(&mut self, signum: i32) -> Result<()>;
}

/// Server-side loop: reads requests off channel 0, dispatches to `handler`,
/// and writes a reply for each. Runs until the channel's read half hits EOF.
pub struct Server {
    writer: ChannelWriter,
    reader: tokio::io::SimplexStream,
}

impl Server {
    #[must_use]
    pub fn new(mux: &Mux) -> Self {
        let (writer, reader) = mux.connect(CONTROL_CHANNEL);
        Self { writer, reader }
    }

    /// A channel that lets other tasks learn when `Start` has been called,
    /// without polling the handler.
    pub async fn serve(mut self, mut handler: impl Handler, started_tx: Option<mpsc::Sender<()>>) -> Result<()> {
        let mut started = false;
        let mut lines = BufReader::new(&mut self.reader).lines();
        loop {
            let line = match lines.next_line().await? {
                Some(l) => l,
                None => return Ok(()),
            };
            let envelope: Envelope =
                serde_json::from_str(&line).map_err(|e| anyhow!("malformed rpc request: {e}"))?;
            let id = envelope.id;
            let is_start = matches!(envelope.request, Request::Start);

            let result = dispatch(&mut handler, envelope.request, &mut started);
            if is_start && result.is_ok() {
                if let Some(tx) = started_tx.as_ref() {
                    let _ = tx.send(()).await;
                }
            }

            let reply = ReplyEnvelope { id, error: result.as_ref().err().map(|e| e.to_string()) };
            let mut buf = serde_json::to_vec(&reply)?;
            buf.push(b'\n');
            self.writer.write(&buf).await?;
        }
    }
}

fn dispatch(handler: &mut impl Handler, request: Request, started: &mut bool) -> Result<()> {
    match request {
        Request::Input { id, fd } => handler.input(id, fd),
        Request::Output { id, fd } => handler.output(id, fd),
        Request::Io { id, fd } => handler.io(id, fd),
        Request::Start => {
            if *started {
                bail!("already started");
            }
            handler.start()?;
            *started = true;
            Ok(())
        }
        Request::Signal { signum } => {
            if !*started {
                return Ok(());
            }
            handler.signal(signum)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording {
        calls: Vec<String>,
    }

    impl Handler for Recording {
        fn input(&mut self, id: u32, fd: i32) -> Result<()> {
            self.calls.push(format!("input({id},{fd})"));
            Ok(())
        }
        fn output(&mut self, id: u32, fd: i32) -> Result<()> {
            self.calls.push(format!("output({id},{fd})"));
            Ok(())
        }
        fn io(&mut self, id: u32, fd: i32) -> Result<()> {
            self.calls.push(format!("io({id},{fd})"));
            Ok(())
        }
        fn start(&mut self) -> Result<()> {
            self.calls.push("start".to_owned());
            Ok(())
        }
        fn signal(&mut self, signum: i32) -> Result<()> {
            self.calls.push(format!("signal({signum})"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn client_calls_are_acked_in_order() {
        let (a_rw, b_rw) = tokio::io::duplex(8192);
        let (a_r, a_w) = tokio::io::split(a_rw);
        let (b_r, b_w) = tokio::io::split(b_rw);

        let (mux_a, demux_a) = Mux::new(a_r, a_w);
        let (mux_b, demux_b) = Mux::new(b_r, b_w);
        tokio::spawn(demux_a.process());
        tokio::spawn(demux_b.process());

        let client = Client::new(&mux_a);
        let server = Server::new(&mux_b);
        let handler = Recording { calls: Vec::new() };
        tokio::spawn(server.serve(handler, None));

        client.input(2, 0).await.unwrap();
        client.output(3, 1).await.unwrap();
        client.output(4, 2).await.unwrap();
        client.start().await.unwrap();
        client.signal(15).await.unwrap();
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let (a_rw, b_rw) = tokio::io::duplex(8192);
        let (a_r, a_w) = tokio::io::split(a_rw);
        let (b_r, b_w) = tokio::io::split(b_rw);

        let (mux_a, demux_a) = Mux::new(a_r, a_w);
        let (mux_b, demux_b) = Mux::new(b_r, b_w);
        tokio::spawn(demux_a.process());
        tokio::spawn(demux_b.process());

        let client = Client::new(&mux_a);
        let server = Server::new(&mux_b);
        let handler = Recording { calls: Vec::new() };
        tokio::spawn(server.serve(handler, None));

        client.start().await.unwrap();
        let err = client.start().await.unwrap_err();
        assert!(err.to_string().contains("already started"), "{err}");
    }
}
