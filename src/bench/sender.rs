use super::buffer::{Fill, ProvisionBuffers, check_len};
use super::config::{BenchConfig, TransferPlan};
use super::handoff::{CoordinatorMessage, HandOff};
use super::report::TimingSample;
use super::state::{RoleState, RoleTracker};
use crate::error::{Error, Result};
use crate::net::endpoint::{Endpoint, StreamEndpoint};
use crate::net::tcp::ConnectStream;
use std::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};

/// Outcome of a sender run. `samples` holds one entry per completed transfer,
/// in order, and is what was handed off regardless of `failure`.
#[derive(Debug)]
pub struct SenderRun {
    pub samples: Vec<TimingSample>,
    pub states: Vec<RoleState>,
    pub failure: Option<Error>,
}

impl SenderRun {
    pub fn into_result(self) -> Result<Vec<TimingSample>> {
        match self.failure {
            Some(e) => Err(e),
            None => Ok(self.samples),
        }
    }
}

/// Sender role: sends `plan.n_iter` buffers of `plan.n_bytes` over a
/// connected endpoint, timing each send. Stops at the first failed transfer
/// without retrying. The samples collected so far are always handed off.
pub async fn send<E: Endpoint>(
    mut endpoint: E,
    plan: &TransferPlan,
    handoff: Option<&dyn HandOff<CoordinatorMessage>>,
) -> SenderRun {
    let mut tracker = RoleTracker::new(RoleState::Connected);
    let mut samples = Vec::with_capacity(plan.n_iter);

    let mut failure = match plan.policy.provision(plan.n_bytes, Fill::Ramp) {
        Ok(mut buffers) => {
            if let Err(e) = tracker.advance(RoleState::Transferring) {
                warn!("{}", e);
            }
            send_loop(&mut endpoint, buffers.as_mut(), plan, &mut samples)
                .await
                .err()
        }
        Err(e) => Some(e),
    };

    if let Err(e) = tracker.advance(RoleState::Closing) {
        warn!("{}", e);
    }
    if let Err(e) = endpoint.close().await {
        debug!("Closing endpoint: {}", e);
    }
    if let Err(e) = tracker.advance(RoleState::Closed) {
        warn!("{}", e);
    }

    if let Some(handoff) = handoff {
        if let Err(e) = handoff.put(CoordinatorMessage::Samples(samples.clone())).await {
            warn!("Handing off {} samples failed: {}", samples.len(), e);
            failure.get_or_insert(e);
        }
    }

    match &failure {
        None => info!("Sent {} transfers of {} bytes", samples.len(), plan.n_bytes),
        Some(e) => warn!("Sender stopped after {} transfers: {}", samples.len(), e),
    }
    SenderRun {
        samples,
        states: tracker.into_history(),
        failure,
    }
}

async fn send_loop<E: Endpoint>(
    endpoint: &mut E,
    buffers: &mut dyn ProvisionBuffers,
    plan: &TransferPlan,
    samples: &mut Vec<TimingSample>,
) -> Result<()> {
    for i in 0..plan.n_iter {
        let buf = buffers.next_buffer();
        check_len(buf.len(), plan.n_bytes)?;

        let start = Instant::now();
        let res = endpoint
            .send(buf)
            .instrument(info_span!("send", iteration = i))
            .await;
        let elapsed = start.elapsed();

        if let Err(e) = res {
            return Err(Error::transfer_failure(i, e));
        }
        debug!("Transfer {} took {:?}", i, elapsed);
        samples.push(TimingSample {
            iteration: i,
            elapsed,
        });
    }
    Ok(())
}

async fn connect<S: ConnectStream>(config: &BenchConfig) -> Result<(TransferPlan, StreamEndpoint<S>)> {
    let plan = config.plan()?;
    let endpoint = StreamEndpoint::<S>::connect(&config.address, config.port).await?;
    Ok((plan, endpoint))
}

/// Connects to the receiver at `config.address:config.port` and runs the
/// sender role. A bad config or a failed connect still hands off an empty
/// sample set.
pub async fn run_sender_role<S: ConnectStream>(
    config: &BenchConfig,
    handoff: &dyn HandOff<CoordinatorMessage>,
) -> Result<Vec<TimingSample>> {
    let (plan, endpoint) = match connect::<S>(config).await {
        Ok(connected) => connected,
        Err(e) => {
            if let Err(put_err) = handoff.put(CoordinatorMessage::Samples(Vec::new())).await {
                debug!("Handing off empty samples: {}", put_err);
            }
            return Err(e);
        }
    };
    send(endpoint, &plan, Some(handoff))
        .instrument(info_span!("sender", address = %config.address, port = config.port))
        .await
        .into_result()
}
