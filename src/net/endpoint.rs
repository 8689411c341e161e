//! Transport contract required by the transfer benchmark, and its
//! stream-socket implementation.
//!
//! An [`Endpoint`] moves whole buffers: `send` completes once every byte was
//! handed to the transport and `recv` once the buffer is completely filled.
//! Both sides agree on the buffer size up front, there is no framing.

use super::tcp::{ConnectStream, Listener};
use super::utils::host_port;
use crate::error::{Error, Result};
use crate::shutdown::{StopSource, StopToken};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

#[async_trait]
pub trait Endpoint: Send {
    async fn send(&mut self, buf: &[u8]) -> Result<()>;
    async fn recv(&mut self, buf: &mut [u8]) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait EndpointListener: Send + Sync {
    type Endpoint: Endpoint;

    /// The port actually bound, which differs from the requested one when
    /// port 0 was asked for.
    fn port(&self) -> u16;
    async fn accept(&self) -> Result<Self::Endpoint>;
    fn close(&self);
    fn closed(&self) -> bool;
}

/// [`Endpoint`] over any connected byte stream.
pub struct StreamEndpoint<S> {
    stream: S,
    closed: bool,
}

impl<S: ConnectStream> StreamEndpoint<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = host_port(host, port);
        let stream = S::connect(&addr).await?;
        debug!("Connected endpoint to {}", addr);
        Ok(Self::new(stream))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn map_stream_error(e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset => Error::ConnectionClosed,
        _ => Error::Io(e),
    }
}

#[async_trait]
impl<S: ConnectStream> Endpoint for StreamEndpoint<S> {
    async fn send(&mut self, buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.stream.write_all(buf).await.map_err(map_stream_error)?;
        self.stream.flush().await.map_err(map_stream_error)
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.stream
            .read_exact(buf)
            .await
            .map_err(map_stream_error)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            // The peer may already be gone, which is what closing wants anyway.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(map_stream_error(e)),
        }
    }
}

/// [`EndpointListener`] over a stream [`Listener`]. Closing drops the
/// listening socket once no accept is in flight.
pub struct StreamListener<L> {
    inner: Mutex<Option<Arc<L>>>,
    port: u16,
    closing: StopSource,
}

impl<L: Listener> StreamListener<L> {
    /// Binds on every interface. Port 0 picks an ephemeral port.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = L::bind((IpAddr::from(Ipv4Addr::UNSPECIFIED), port)).await?;
        Self::from_listener(listener)
    }

    pub fn from_listener(listener: L) -> Result<Self> {
        let port = listener.local_addr()?.port();
        Ok(Self {
            inner: Mutex::new(Some(Arc::new(listener))),
            port,
            closing: StopSource::new(),
        })
    }

    fn closing_token(&self) -> StopToken {
        self.closing.token()
    }
}

#[async_trait]
impl<L: Listener> EndpointListener for StreamListener<L> {
    type Endpoint = StreamEndpoint<L::Stream>;

    fn port(&self) -> u16 {
        self.port
    }

    async fn accept(&self) -> Result<Self::Endpoint> {
        let listener = self.inner.lock().clone();
        let Some(listener) = listener else {
            return Err(Error::ConnectionClosed);
        };
        let mut closing = self.closing_token();
        tokio::select! {
            res = listener.accept() => {
                let (stream, peer) = res?;
                debug!("Accepted endpoint from {}", peer);
                Ok(StreamEndpoint::new(stream))
            }
            _ = closing.stopped() => Err(Error::ConnectionClosed),
        }
    }

    fn close(&self) {
        self.closing.stop();
        self.inner.lock().take();
    }

    fn closed(&self) -> bool {
        self.closing.is_stopped()
    }
}
