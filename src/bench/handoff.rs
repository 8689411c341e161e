//! Channel between a benchmark role and the coordinator that launched it.
//! The receiver publishes its bound port once; the sender publishes its
//! timing samples once, even when the run failed.

use super::report::TimingSample;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::marker::PhantomData;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Empty, Lines, Sink,
};
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

#[async_trait]
pub trait HandOff<T>: Send + Sync {
    async fn put(&self, value: T) -> Result<()>;
    async fn get(&self) -> Result<T>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CoordinatorMessage {
    BoundPort(u16),
    Samples(Vec<TimingSample>),
}

/// In-process hand-off, for roles running as tasks of the coordinator.
pub struct ChannelHandOff<T> {
    tx: mpsc::UnboundedSender<T>,
    rx: Mutex<mpsc::UnboundedReceiver<T>>,
}

impl<T> ChannelHandOff<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl<T> Default for ChannelHandOff<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> HandOff<T> for ChannelHandOff<T> {
    async fn put(&self, value: T) -> Result<()> {
        self.tx
            .send(value)
            .map_err(|_| Error::hand_off("receiving side is gone"))
    }

    async fn get(&self) -> Result<T> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| Error::hand_off("channel closed"))
    }
}

/// Hand-off over a byte pipe, one JSON document per line. A role process
/// writes to its stdout; the coordinator reads the child's stdout.
pub struct LineHandOff<T, R, W> {
    reader: Option<Mutex<Lines<BufReader<R>>>>,
    writer: Option<Mutex<W>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, W> LineHandOff<T, Empty, W> {
    pub fn writer(writer: W) -> Self {
        Self {
            reader: None,
            writer: Some(Mutex::new(writer)),
            _marker: PhantomData,
        }
    }
}

impl<T, R: AsyncRead + Unpin> LineHandOff<T, R, Sink> {
    pub fn reader(reader: R) -> Self {
        Self {
            reader: Some(Mutex::new(BufReader::new(reader).lines())),
            writer: None,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T, R, W> HandOff<T> for LineHandOff<T, R, W>
where
    T: Serialize + DeserializeOwned + Send + 'static,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn put(&self, value: T) -> Result<()> {
        let writer = self
            .writer
            .as_ref()
            .ok_or_else(|| Error::hand_off("hand-off is read-only"))?;
        let mut line = serde_json::to_vec(&value).map_err(Error::hand_off)?;
        line.push(b'\n');
        let mut writer = writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn get(&self) -> Result<T> {
        let reader = self
            .reader
            .as_ref()
            .ok_or_else(|| Error::hand_off("hand-off is write-only"))?;
        let mut lines = reader.lock().await;
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => return Ok(value),
                // Anything else the child printed is not for us.
                Err(e) => debug!("Skipping non hand-off line ({}): {}", e, line),
            }
        }
        Err(Error::hand_off("pipe closed before a value arrived"))
    }
}
