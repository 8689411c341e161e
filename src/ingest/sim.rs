//! Stand-in for the sampling front end: streams synthetic frames to an
//! ingestion listener at the device's frame rate.

use super::frame::{BITSTREAM_LEN, Frame};
use crate::error::Result;
use crate::net::tcp::ConnectStream;
use crate::net::utils::host_port;
use crate::shutdown::StopToken;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

pub const SIM_PROTOCOL_VERSION: i32 = 1;
pub const SIM_FS: i32 = 16000;
pub const SIM_SAMPLES: i32 = 64;

pub struct FrameSimulator<S> {
    stream: S,
    pace: Option<Duration>,
}

impl<S: ConnectStream> FrameSimulator<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            pace: Some(Self::frame_period()),
        }
    }

    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = host_port(host, port);
        let stream = S::connect(&addr).await?;
        info!("Connected to {}", addr);
        Ok(Self::new(stream))
    }

    /// One frame every `1 / fs` seconds.
    pub fn frame_period() -> Duration {
        Duration::from_nanos(1_000_000_000 / SIM_FS as u64)
    }

    /// Write frames back to back instead of at the sampling rate.
    pub fn unpaced(mut self) -> Self {
        self.pace = None;
        self
    }

    pub fn frame(i: u64) -> Frame {
        let seq = i as i32;
        Frame {
            id: seq,
            protocol_version: SIM_PROTOCOL_VERSION,
            fs: SIM_FS,
            fs_nr: seq,
            samples: SIM_SAMPLES,
            sample_error: 0,
            bitstream: [0; BITSTREAM_LEN],
        }
    }

    /// Sends `count` frames, or until stopped. Returns how many were written.
    /// A write failure ends the run with an error.
    pub async fn run(&mut self, count: u64, mut stop: StopToken) -> Result<u64> {
        let mut ticker = self.pace.map(|period| {
            let mut ticker = interval(period);
            // Catch up after scheduler hiccups so the average rate holds.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            ticker
        });
        let mut buf = BytesMut::new();
        let mut sent = 0;
        while sent < count {
            if let Some(ticker) = ticker.as_mut() {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.stopped() => break,
                }
            } else if stop.is_stopped() {
                break;
            }
            buf.clear();
            Self::frame(sent).encode_into(&mut buf);
            self.stream.write_all(&buf).await?;
            sent += 1;
        }
        self.stream.flush().await?;
        debug!("Simulator wrote {} frames", sent);
        Ok(sent)
    }

    /// Writes arbitrary bytes, e.g. a truncated frame.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
