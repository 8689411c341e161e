use super::frame::{FRAME_LEN, Frame};
use crate::error::{Error, Result};
use crate::net::tcp::{ConnectStream, Listener};
use crate::net::utils::{host_port, my_name};
use crate::queue::HandoffQueue;
use crate::shutdown::{StopSource, StopToken};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener as TokioTcpListener;
use tracing::{debug, info, warn};

pub const DEFAULT_INGEST_PORT: u16 = 45405;

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub address: String,
    pub port: u16,
    /// Bytes read per frame. Anything but [`FRAME_LEN`] fails every decode.
    pub frame_len: usize,
}

impl IngestConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            frame_len: FRAME_LEN,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        let address = my_name().unwrap_or_else(|_| "localhost".to_string());
        Self::new(address, DEFAULT_INGEST_PORT)
    }
}

/// Why the read loop stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestEnd {
    /// The source closed the stream on a frame boundary.
    EndOfStream,
    /// The source closed mid-frame; the partial bytes were dropped.
    PartialFrame { bytes: usize },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestSummary {
    pub frames: u64,
    pub end: IngestEnd,
}

enum ReadOutcome {
    Full,
    Closed { partial: usize },
    Stopped,
}

/// Single-client frame listener. Accepts one connection, then decodes the
/// stream frame by frame into a [`HandoffQueue`].
pub struct IngestListener<L> {
    listener: L,
    frame_len: usize,
}

impl<L: Listener> IngestListener<L> {
    pub async fn bind(config: &IngestConfig) -> Result<Self> {
        let listener = L::bind(host_port(&config.address, config.port)).await?;
        Ok(Self::new(listener, config.frame_len))
    }

    /// Wraps a listener that is already bound.
    pub fn new(listener: L, frame_len: usize) -> Self {
        Self {
            listener,
            frame_len,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept-then-read loop to completion.
    ///
    /// Every fully received frame is enqueued exactly once. A decode failure
    /// closes the connection and is returned; a clean close or a stop request
    /// ends the loop normally, also while waiting for room in a full bounded
    /// queue. That wait blocks the thread, so this belongs on a thread of its
    /// own (see [`IngestHandle`]).
    pub async fn run(
        self,
        queue: Arc<HandoffQueue<Frame>>,
        mut stop: StopToken,
    ) -> Result<IngestSummary> {
        let (mut stream, peer) = tokio::select! {
            res = self.listener.accept() => res?,
            _ = stop.stopped() => {
                info!("Ingest listener stopped before a source connected");
                return Ok(IngestSummary { frames: 0, end: IngestEnd::Stopped });
            }
        };
        // Single-client: later connection attempts are refused.
        drop(self.listener);
        info!("Frame source connected from {}", peer);

        let mut buf = vec![0u8; self.frame_len];
        let mut frames = 0u64;
        let end = loop {
            if stop.is_stopped() {
                break IngestEnd::Stopped;
            }
            let outcome = match read_frame(&mut stream, &mut buf, &mut stop).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Reading from frame source failed: {}", e);
                    let _ = stream.shutdown().await;
                    return Err(e.into());
                }
            };
            match outcome {
                ReadOutcome::Full => {}
                ReadOutcome::Closed { partial: 0 } => break IngestEnd::EndOfStream,
                ReadOutcome::Closed { partial } => {
                    warn!("Frame source closed mid-frame, dropping {} bytes", partial);
                    break IngestEnd::PartialFrame { bytes: partial };
                }
                ReadOutcome::Stopped => break IngestEnd::Stopped,
            }
            let frame = match Frame::decode(&buf) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Closing frame source after {} frames: {}", frames, e);
                    let _ = stream.shutdown().await;
                    return Err(e);
                }
            };
            if let Err(frame) = queue.enqueue_until(frame, &stop) {
                warn!("Stopped with the queue full, dropping frame {}", frame.id);
                break IngestEnd::Stopped;
            }
            frames += 1;
        };

        let _ = stream.shutdown().await;
        info!("Ingest finished after {} frames ({:?})", frames, end);
        Ok(IngestSummary { frames, end })
    }
}

/// Fills `buf` completely unless the stream closes or a stop is requested
/// first. Reads are cancel-safe, so abandoning one on stop loses nothing that
/// was not already going to be dropped as a partial frame.
async fn read_frame<S: ConnectStream>(
    stream: &mut S,
    buf: &mut [u8],
    stop: &mut StopToken,
) -> io::Result<ReadOutcome> {
    let mut filled = 0;
    while filled < buf.len() {
        tokio::select! {
            n = stream.read(&mut buf[filled..]) => {
                let n = n?;
                if n == 0 {
                    return Ok(ReadOutcome::Closed { partial: filled });
                }
                filled += n;
            }
            _ = stop.stopped() => return Ok(ReadOutcome::Stopped),
        }
    }
    Ok(ReadOutcome::Full)
}

/// An [`IngestListener`] running on a dedicated thread with its own runtime,
/// so callers can poll frames from any context, including an event loop.
pub struct IngestHandle {
    queue: Arc<HandoffQueue<Frame>>,
    stop: StopSource,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<Result<IngestSummary>>>,
}

impl IngestHandle {
    /// Binds and starts listening. Returns once the socket is bound.
    pub fn spawn(config: &IngestConfig, queue: Arc<HandoffQueue<Frame>>) -> Result<Self> {
        let stop = StopSource::new();
        let token = stop.token();
        let (bound_tx, bound_rx) = mpsc::sync_channel::<Result<SocketAddr>>(1);
        let config = config.clone();
        let producer_queue = queue.clone();

        let thread = thread::Builder::new()
            .name("ingest-listener".to_string())
            .spawn(move || -> Result<IngestSummary> {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                rt.block_on(async move {
                    // A bind error drops `bound_tx` and is picked up from join().
                    let listener = IngestListener::<TokioTcpListener>::bind(&config).await?;
                    let _ = bound_tx.send(listener.local_addr());
                    listener.run(producer_queue, token).await
                })
            })?;

        let local_addr = match bound_rx.recv() {
            Ok(Ok(addr)) => addr,
            Ok(Err(e)) => {
                stop.stop();
                return Err(e);
            }
            Err(_) => {
                // The thread died before reporting, surface its error.
                return match thread.join() {
                    Ok(Err(e)) => Err(e),
                    _ => Err(Error::Io(io::Error::other(
                        "ingest listener thread exited before binding",
                    ))),
                };
            }
        };
        debug!("Ingest listener bound to {}", local_addr);

        Ok(Self {
            queue,
            stop,
            local_addr,
            thread: Some(thread),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn queue(&self) -> &Arc<HandoffQueue<Frame>> {
        &self.queue
    }

    /// All frames decoded so far, oldest first. Never blocks.
    pub fn poll(&self) -> Vec<Frame> {
        self.queue.drain_all_nonblocking()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Waits for the listener to finish on its own (source closed or failed).
    pub fn join(mut self) -> Result<IngestSummary> {
        self.join_thread()
    }

    /// Requests a stop and waits for the listener thread.
    pub fn shutdown(mut self) -> Result<IngestSummary> {
        self.stop.stop();
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<IngestSummary> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::Io(io::Error::other("ingest listener thread panicked")))?,
            None => Err(Error::Io(io::Error::other("ingest listener already joined"))),
        }
    }
}

impl Drop for IngestHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}
