use super::buffer::{Fill, ProvisionBuffers, check_len};
use super::config::{BenchConfig, TransferPlan};
use super::handoff::{CoordinatorMessage, HandOff};
use super::state::{RoleState, RoleTracker};
use crate::error::{Error, Result};
use crate::net::endpoint::{Endpoint, EndpointListener, StreamListener};
use crate::net::tcp::Listener;
use tracing::{Instrument, debug, info, info_span, warn};

#[derive(Debug, Clone)]
pub struct ReceiverReport {
    pub transfers: usize,
    pub allocations: usize,
    pub states: Vec<RoleState>,
}

fn advance(tracker: &mut RoleTracker, to: RoleState) {
    if let Err(e) = tracker.advance(to) {
        warn!("{}", e);
    }
}

/// Receiver role: accepts one endpoint, receives exactly `plan.n_iter`
/// transfers of `plan.n_bytes`, then closes endpoint and listener. The bound
/// port is published through `handoff` before accepting.
pub async fn receive<L: EndpointListener>(
    listener: L,
    plan: &TransferPlan,
    handoff: Option<&dyn HandOff<CoordinatorMessage>>,
) -> Result<ReceiverReport> {
    let mut tracker = RoleTracker::new(RoleState::Listening);
    let mut buffers = match plan.policy.provision(plan.n_bytes, Fill::Zeroed) {
        Ok(buffers) => buffers,
        Err(e) => {
            listener.close();
            return Err(e);
        }
    };

    info!("Listening on port {}", listener.port());
    if let Some(handoff) = handoff {
        if let Err(e) = handoff.put(CoordinatorMessage::BoundPort(listener.port())).await {
            listener.close();
            return Err(e);
        }
    }

    let mut endpoint = match listener.accept().await {
        Ok(endpoint) => endpoint,
        Err(e) => {
            listener.close();
            return Err(e);
        }
    };
    advance(&mut tracker, RoleState::Connected);
    advance(&mut tracker, RoleState::Transferring);

    let result = recv_loop(&mut endpoint, buffers.as_mut(), plan).await;

    advance(&mut tracker, RoleState::Closing);
    if let Err(e) = endpoint.close().await {
        debug!("Closing endpoint: {}", e);
    }
    listener.close();
    advance(&mut tracker, RoleState::Closed);

    let transfers = result?;
    info!("Received {} transfers of {} bytes", transfers, plan.n_bytes);
    Ok(ReceiverReport {
        transfers,
        allocations: buffers.allocations(),
        states: tracker.into_history(),
    })
}

async fn recv_loop<E: Endpoint>(
    endpoint: &mut E,
    buffers: &mut dyn ProvisionBuffers,
    plan: &TransferPlan,
) -> Result<usize> {
    for i in 0..plan.n_iter {
        let buf = buffers.next_buffer();
        check_len(buf.len(), plan.n_bytes)?;
        if let Err(e) = endpoint
            .recv(buf)
            .instrument(info_span!("recv", iteration = i))
            .await
        {
            warn!("Transfer {} failed: {}", i, e);
            return Err(Error::transfer_failure(i, e));
        }
        debug!("Transfer {} received", i);
    }
    Ok(plan.n_iter)
}

/// Binds a stream listener on `config.port` and runs the receiver role on it.
pub async fn run_receiver_role<L: Listener>(
    config: &BenchConfig,
    handoff: &dyn HandOff<CoordinatorMessage>,
) -> Result<ReceiverReport> {
    let plan = config.plan()?;
    let listener = StreamListener::<L>::bind(config.port).await?;
    receive(listener, &plan, Some(handoff))
        .instrument(info_span!("receiver", port = config.port))
        .await
}
