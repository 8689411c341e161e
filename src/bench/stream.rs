//! Open-ended receiver: keeps pulling fixed-size transfers off one endpoint
//! and publishes how long each took, for a consumer that polls the rate.

use super::buffer::{Fill, ProvisionBuffers, ReusedBuffer, check_len};
use super::report::{TimingSample, rate};
use crate::error::{Error, Result};
use crate::net::endpoint::{Endpoint, EndpointListener};
use crate::queue::HandoffQueue;
use crate::shutdown::StopToken;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Accepts one endpoint and receives `n_bytes` transfers into a single reused
/// buffer until `stop` fires or the peer goes away. Each completed transfer
/// pushes a sample timed from the previous completion (from accept, for the
/// first). Returns the number of transfers received.
///
/// `queue` should be unbounded: a full bounded queue blocks this task.
pub async fn receive_stream<L: EndpointListener>(
    listener: L,
    n_bytes: usize,
    queue: Arc<HandoffQueue<TimingSample>>,
    mut stop: StopToken,
) -> Result<usize> {
    if n_bytes == 0 {
        listener.close();
        return Err(Error::configuration("n_bytes must be positive"));
    }
    let mut buffer = ReusedBuffer::new(n_bytes, Fill::Zeroed);
    if let Err(e) = check_len(buffer.buffer_len(), n_bytes) {
        listener.close();
        return Err(e);
    }

    let accepted = tokio::select! {
        res = listener.accept() => res,
        _ = stop.stopped() => {
            listener.close();
            return Ok(0);
        }
    };
    let mut endpoint = match accepted {
        Ok(endpoint) => endpoint,
        Err(e) => {
            listener.close();
            return Err(e);
        }
    };
    info!("Streaming {}-byte transfers on port {}", n_bytes, listener.port());

    let mut received = 0;
    let mut last = Instant::now();
    let result = loop {
        if stop.is_stopped() {
            break Ok(received);
        }
        let res = tokio::select! {
            res = endpoint.recv(buffer.next_buffer()) => res,
            _ = stop.stopped() => break Ok(received),
        };
        match res {
            Ok(()) => {
                let now = Instant::now();
                let elapsed = now - last;
                last = now;
                debug!(
                    "Transfer {} at {:?} bytes/s",
                    received,
                    rate(n_bytes as u64, elapsed)
                );
                queue.enqueue(TimingSample {
                    iteration: received,
                    elapsed,
                });
                received += 1;
            }
            Err(Error::ConnectionClosed) => {
                info!("Peer closed the stream after {} transfers", received);
                break Ok(received);
            }
            Err(e) => {
                warn!("Transfer {} failed: {}", received, e);
                break Err(Error::transfer_failure(received, e));
            }
        }
    };

    if let Err(e) = endpoint.close().await {
        debug!("Closing endpoint: {}", e);
    }
    listener.close();
    result
}
