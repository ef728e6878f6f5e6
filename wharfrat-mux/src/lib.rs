//! A single-duplex-connection multiplexer: one control RPC channel plus an
//! arbitrary number of independent, flow-controlled byte streams (stdio,
//! inherited extra file descriptors) share one transport.
//!
//! The wire format and ack-based backpressure are described in the crate's
//! sibling `frame` module. `Mux` is the handle application code uses to open
//! channels and register sinks; `Demux` owns the read half and runs the
//! single-task main loop (`Demux::process`) that demultiplexes incoming
//! frames and replies with acks.

mod frame;

use std::{
    collections::HashMap,
    io,
    pin::Pin,
    sync::{Arc, Mutex as StdMutex},
};

use anyhow::{anyhow, bail, Result};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{oneshot, Mutex as AsyncMutex},
};

pub use frame::{FrameHeader, HEADER_LEN, MAX_CHUNK};

type BoxRead = Pin<Box<dyn AsyncRead + Send>>;
type BoxWrite = Pin<Box<dyn AsyncWrite + Send>>;
type BoxSink = Pin<Box<dyn AsyncWrite + Send>>;

struct Shared {
    writer: AsyncMutex<BoxWrite>,
    routes: StdMutex<HashMap<u32, BoxSink>>,
    acks: StdMutex<HashMap<u32, oneshot::Sender<Result<(), String>>>>,
    channel_locks: StdMutex<HashMap<u32, Arc<AsyncMutex<()>>>>,
}

impl Shared {
    fn channel_lock(&self, id: u32) -> Arc<AsyncMutex<()>> {
        self.channel_locks.lock().expect("lock").entry(id).or_default().clone()
    }
}

/// Handle used by application code to open channels, send, and register
/// receive sinks. Cheap to clone; all clones share the same transport and
/// routing table.
#[derive(Clone)]
pub struct Mux {
    shared: Arc<Shared>,
}

/// Owns the transport's read half; `process()` is the demultiplexer main
/// loop and should be driven by exactly one task.
pub struct Demux {
    shared: Arc<Shared>,
    reader: BoxRead,
}

/// A flow-controlled write handle bound to one channel id.
#[derive(Clone)]
pub struct ChannelWriter {
    id: u32,
    shared: Arc<Shared>,
}

impl Mux {
    /// Build a mux over a duplex transport. Returns the application handle
    /// and the demultiplexer, which must be `process()`ed by a dedicated
    /// task for the mux to do anything at all.
    pub fn new(
        reader: impl AsyncRead + Send + 'static,
        writer: impl AsyncWrite + Send + 'static,
    ) -> (Mux, Demux) {
        let shared = Arc::new(Shared {
            writer: AsyncMutex::new(Box::pin(writer)),
            routes: StdMutex::new(HashMap::new()),
            acks: StdMutex::new(HashMap::new()),
            channel_locks: StdMutex::new(HashMap::new()),
        });
        let mux = Mux { shared: shared.clone() };
        let demux = Demux { shared, reader: Box::pin(reader) };
        (mux, demux)
    }

    /// A write handle for `id`. Safe to call repeatedly; all returned
    /// writers serialize through the same per-channel lock.
    #[must_use]
    pub fn send(&self, id: u32) -> ChannelWriter {
        ChannelWriter { id, shared: self.shared.clone() }
    }

    /// Registers `sink` as the destination for data arriving on channel
    /// `id`. Replaces any previous registration for that id.
    pub fn recv(&self, id: u32, sink: impl AsyncWrite + Send + 'static) {
        self.shared.routes.lock().expect("lock").insert(id, Box::pin(sink));
    }

    /// Opens a bidirectional channel: registers an internal sink and hands
    /// back its read half alongside a writer, mirroring a local byte pipe
    /// wired onto channel `id`.
    pub fn connect(&self, id: u32) -> (ChannelWriter, tokio::io::SimplexStream) {
        let (read_half, write_half) = tokio::io::simplex(64 * 1024);
        self.recv(id, write_half);
        (self.send(id), read_half)
    }
}

impl ChannelWriter {
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Frames `data`, chunked to at most [`MAX_CHUNK`] bytes per frame, and
    /// waits for an ack after each chunk before sending the next — this is
    /// the multiplexer's entire flow-control mechanism.
    pub async fn write(&self, mut data: &[u8]) -> Result<()> {
        let lock = self.shared.channel_lock(self.id);
        let _guard = lock.lock().await;
        while !data.is_empty() {
            let n = data.len().min(MAX_CHUNK);
            self.send_chunk(&data[..n]).await?;
            data = &data[n..];
        }
        Ok(())
    }

    async fn send_chunk(&self, chunk: &[u8]) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shared.acks.lock().expect("lock").insert(self.id, tx);

        let hdr = FrameHeader::data(self.id, chunk.len() as u32);
        {
            let mut w = self.shared.writer.lock().await;
            w.write_all(&hdr.encode()).await?;
            w.write_all(chunk).await?;
            w.flush().await?;
        }

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(msg)) => bail!("channel {}: peer rejected write: {msg}", self.id),
            Err(_) => bail!("channel {}: transport closed awaiting ack", self.id),
        }
    }

    /// Emits a zero-length data frame, idempotently. No ack is expected for
    /// a close frame.
    pub async fn close(&self) -> Result<()> {
        let lock = self.shared.channel_lock(self.id);
        let _guard = lock.lock().await;
        let hdr = FrameHeader::data(self.id, 0);
        let mut w = self.shared.writer.lock().await;
        w.write_all(&hdr.encode()).await?;
        w.flush().await?;
        Ok(())
    }
}

impl Demux {
    /// Runs until the transport hits a clean EOF (returns `Ok(())`) or an
    /// error (read error, or EOF in the middle of a frame). On return, every
    /// registered sink is shut down and every writer awaiting an ack is
    /// woken with an error — that's how cancellation propagates to the
    /// per-stream copy tasks described in the exec driver.
    pub async fn process(mut self) -> Result<()> {
        let result = self.run().await;
        self.drain(&result);
        result
    }

    async fn run(&mut self) -> Result<()> {
        loop {
            let mut hdr_buf = [0u8; HEADER_LEN];
            if !read_fully_or_clean_eof(&mut self.reader, &mut hdr_buf).await? {
                return Ok(());
            }
            let hdr = FrameHeader::decode(&hdr_buf);

            let mut payload = vec![0u8; hdr.len as usize];
            if !payload.is_empty() && !read_fully_or_clean_eof(&mut self.reader, &mut payload).await?
            {
                bail!(io::Error::new(io::ErrorKind::UnexpectedEof, "eof mid-frame"));
            }

            if hdr.is_ack {
                self.handle_ack(hdr.channel, payload);
            } else if hdr.is_close() {
                self.handle_close(hdr.channel).await;
            } else {
                self.handle_data(hdr.channel, payload).await?;
            }
        }
    }

    fn handle_ack(&self, channel: u32, payload: Vec<u8>) {
        let tx = self.shared.acks.lock().expect("lock").remove(&channel);
        let Some(tx) = tx else {
            log::warn!("mux: ack for channel {channel} with no waiting writer");
            return;
        };
        let result = if payload.is_empty() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&payload).into_owned())
        };
        let _ = tx.send(result);
    }

    async fn handle_close(&self, channel: u32) {
        let sink = self.shared.routes.lock().expect("lock").remove(&channel);
        if let Some(mut sink) = sink {
            let _ = sink.shutdown().await;
        }
    }

    async fn handle_data(&mut self, channel: u32, payload: Vec<u8>) -> Result<()> {
        let has_sink = self.shared.routes.lock().expect("lock").contains_key(&channel);
        let write_result: Result<(), String> = if has_sink {
            // Scope the lock narrowly: we can't hold the std Mutex across an
            // await, so pull the sink out, use it, then put it back.
            let mut sink = self.shared.routes.lock().expect("lock").remove(&channel);
            let res = match sink.as_mut() {
                Some(s) => s.write_all(&payload).await.map_err(|e| e.to_string()),
                None => Err("closed pipe".to_owned()),
            };
            if let Some(s) = sink {
                if res.is_ok() {
                    self.shared.routes.lock().expect("lock").insert(channel, s);
                }
            }
            res
        } else {
            Err("closed pipe".to_owned())
        };

        let ack_len = write_result.as_ref().err().map_or(0, |e| e.len()) as u32;
        let ack_hdr = FrameHeader::ack(channel, ack_len);
        let mut w = self.shared.writer.lock().await;
        w.write_all(&ack_hdr.encode()).await?;
        if let Err(ref msg) = write_result {
            w.write_all(msg.as_bytes()).await?;
        }
        w.flush().await?;
        Ok(())
    }

    fn drain(&self, result: &Result<()>) {
        let sinks: Vec<_> = self.shared.routes.lock().expect("lock").drain().map(|(_, s)| s).collect();
        for mut s in sinks {
            tokio::spawn(async move {
                let _ = s.shutdown().await;
            });
        }
        let acks: Vec<_> = self.shared.acks.lock().expect("lock").drain().map(|(_, tx)| tx).collect();
        let msg = match result {
            Ok(()) => "transport closed".to_owned(),
            Err(e) => format!("transport closed: {e}"),
        };
        for tx in acks {
            let _ = tx.send(Err(msg.clone()));
        }
    }
}

/// Reads until `buf` is full. Returns `Ok(true)` if it filled, `Ok(false)`
/// if EOF was hit before any byte was consumed (a "clean" EOF at a frame
/// boundary). An EOF after partial consumption is surfaced to the caller,
/// which turns it into `UnexpectedEof` — mid-frame EOF is never clean.
async fn read_fully_or_clean_eof<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..]).await.map_err(|e| anyhow!(e))?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(anyhow!(io::Error::new(io::ErrorKind::UnexpectedEof, "eof mid-frame")));
        }
        filled += n;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use tokio::io::{duplex, AsyncReadExt};

    use super::*;

    #[tokio::test]
    async fn round_trips_bytes_through_a_channel() {
        let (a_rw, b_rw) = duplex(4096);
        let (a_r, a_w) = tokio::io::split(a_rw);
        let (b_r, b_w) = tokio::io::split(b_rw);

        let (mux_a, demux_a) = Mux::new(a_r, a_w);
        let (mux_b, demux_b) = Mux::new(b_r, b_w);
        tokio::spawn(demux_a.process());
        tokio::spawn(demux_b.process());

        let mut sink = Vec::new();
        // b receives on channel 5 into an in-memory buffer via a pipe.
        let (tx_w, mut rx_r) = tokio::io::simplex(4096);
        mux_b.recv(5, tx_w);

        let reader = tokio::spawn(async move {
            let mut buf = [0u8; 5];
            rx_r.read_exact(&mut buf).await.unwrap();
            buf
        });

        mux_a.send(5).write(b"hello").await.unwrap();
        let got = reader.await.unwrap();
        assert_eq!(&got, b"hello");
        sink.extend_from_slice(&got);
        assert_eq!(sink, b"hello");
    }

    #[tokio::test]
    async fn concurrent_writes_on_distinct_channels_stay_independent() {
        let (a_rw, b_rw) = duplex(8192);
        let (a_r, a_w) = tokio::io::split(a_rw);
        let (b_r, b_w) = tokio::io::split(b_rw);

        let (mux_a, demux_a) = Mux::new(a_r, a_w);
        let (mux_b, demux_b) = Mux::new(b_r, b_w);
        tokio::spawn(demux_a.process());
        tokio::spawn(demux_b.process());

        let (w1, mut r1) = mux_b.connect(1);
        let (w2, mut r2) = mux_b.connect(2);
        drop((w1, w2));

        mux_a.send(1).write(b"stream-one").await.unwrap();
        mux_a.send(2).write(b"stream-two").await.unwrap();

        let mut buf1 = [0u8; 10];
        let mut buf2 = [0u8; 10];
        r1.read_exact(&mut buf1).await.unwrap();
        r2.read_exact(&mut buf2).await.unwrap();
        assert_eq!(&buf1, b"stream-one");
        assert_eq!(&buf2, b"stream-two");
    }

    #[tokio::test]
    async fn close_is_observed_once_after_prior_data() {
        let (a_rw, b_rw) = duplex(4096);
        let (a_r, a_w) = tokio::io::split(a_rw);
        let (b_r, b_w) = tokio::io::split(b_rw);

        let (mux_a, demux_a) = Mux::new(a_r, a_w);
        let (mux_b, demux_b) = Mux::new(b_r, b_w);
        tokio::spawn(demux_a.process());
        tokio::spawn(demux_b.process());

        let (_w, mut r) = mux_b.connect(9);
        let writer = mux_a.send(9);
        writer.write(b"payload").await.unwrap();
        writer.close().await.unwrap();

        let mut buf = Vec::new();
        r.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"payload");
    }

    #[tokio::test]
    async fn write_to_unregistered_channel_fails_with_closed_pipe() {
        let (a_rw, b_rw) = duplex(4096);
        let (a_r, a_w) = tokio::io::split(a_rw);
        let (b_r, b_w) = tokio::io::split(b_rw);

        let (mux_a, demux_a) = Mux::new(a_r, a_w);
        let (_mux_b, demux_b) = Mux::new(b_r, b_w);
        tokio::spawn(demux_a.process());
        tokio::spawn(demux_b.process());

        let err = mux_a.send(42).write(b"nobody home").await.unwrap_err();
        assert!(err.to_string().contains("closed pipe"), "{err}");
    }
}
