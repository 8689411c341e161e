use async_trait::async_trait;
use datatransfer::Error;
use datatransfer::bench::{
    BenchConfig, ChannelHandOff, CoordinatorMessage, HandOff, ReusePolicy, Role, RoleState,
    ThroughputReport, TimingSample, TransferPlan, receive, receive_stream, run_receiver_role,
    run_sender_role, send,
};
use datatransfer::net::{Endpoint, EndpointListener, StreamEndpoint, StreamListener};
use datatransfer::queue::HandoffQueue;
use datatransfer::shutdown::StopSource;
use serial_test::serial;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

type Channel = Arc<ChannelHandOff<CoordinatorMessage>>;

fn plan(n_bytes: usize, n_iter: usize, policy: ReusePolicy) -> TransferPlan {
    TransferPlan {
        n_bytes,
        n_iter,
        policy,
    }
}

async fn bound_port(handoff: &Channel) -> u16 {
    match handoff.get().await.unwrap() {
        CoordinatorMessage::BoundPort(port) => port,
        other => panic!("expected bound port, got {:?}", other),
    }
}

async fn samples(handoff: &Channel) -> Vec<TimingSample> {
    match handoff.get().await.unwrap() {
        CoordinatorMessage::Samples(samples) => samples,
        other => panic!("expected samples, got {:?}", other),
    }
}

#[tokio::test]
async fn receiver_reuses_one_buffer() {
    let plan = plan(792, 20, ReusePolicy::Reuse);
    let handoff: Channel = Arc::new(ChannelHandOff::new());
    let listener = StreamListener::<TcpListener>::bind(0).await.unwrap();

    let receiver = {
        let handoff = handoff.clone();
        tokio::spawn(async move { receive(listener, &plan, Some(&*handoff)).await })
    };
    let port = bound_port(&handoff).await;
    assert_ne!(port, 0);

    let endpoint = StreamEndpoint::<TcpStream>::connect("127.0.0.1", port)
        .await
        .unwrap();
    let run = send(endpoint, &plan, Some(&*handoff)).await;
    assert!(run.failure.is_none());
    assert_eq!(
        run.states,
        vec![
            RoleState::Connected,
            RoleState::Transferring,
            RoleState::Closing,
            RoleState::Closed
        ]
    );

    let report = receiver.await.unwrap().unwrap();
    assert_eq!(report.transfers, 20);
    assert_eq!(report.allocations, 1);
    assert_eq!(
        report.states,
        vec![
            RoleState::Listening,
            RoleState::Connected,
            RoleState::Transferring,
            RoleState::Closing,
            RoleState::Closed
        ]
    );

    let handed = samples(&handoff).await;
    assert_eq!(handed, run.samples);
    let iterations: Vec<usize> = handed.iter().map(|s| s.iteration).collect();
    assert_eq!(iterations, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn fresh_policy_allocates_per_iteration() {
    let plan = plan(4096, 8, ReusePolicy::Fresh);
    let listener = StreamListener::<TcpListener>::bind(0).await.unwrap();
    let port = listener.port();
    let receiver = tokio::spawn(async move { receive(listener, &plan, None).await });

    let endpoint = StreamEndpoint::<TcpStream>::connect("127.0.0.1", port)
        .await
        .unwrap();
    let sent = send(endpoint, &plan, None).await.into_result().unwrap();
    assert_eq!(sent.len(), 8);

    let report = receiver.await.unwrap().unwrap();
    assert_eq!(report.transfers, 8);
    assert_eq!(report.allocations, 8);
}

#[tokio::test]
async fn receiver_closes_listener_when_done() {
    let plan = plan(1024, 2, ReusePolicy::Reuse);
    let listener = StreamListener::<TcpListener>::bind(0).await.unwrap();
    let port = listener.port();
    let receiver = tokio::spawn(async move { receive(listener, &plan, None).await });

    let endpoint = StreamEndpoint::<TcpStream>::connect("127.0.0.1", port)
        .await
        .unwrap();
    send(endpoint, &plan, None).await.into_result().unwrap();
    receiver.await.unwrap().unwrap();

    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn receiver_stops_at_first_short_transfer() {
    let receiver_plan = plan(2048, 20, ReusePolicy::Reuse);
    let listener = StreamListener::<TcpListener>::bind(0).await.unwrap();
    let port = listener.port();
    let receiver = tokio::spawn(async move { receive(listener, &receiver_plan, None).await });

    // The sender gives up after five transfers.
    let sender_plan = plan(2048, 5, ReusePolicy::Reuse);
    let endpoint = StreamEndpoint::<TcpStream>::connect("127.0.0.1", port)
        .await
        .unwrap();
    send(endpoint, &sender_plan, None)
        .await
        .into_result()
        .unwrap();

    let res = receiver.await.unwrap();
    assert!(matches!(
        res,
        Err(Error::TransferFailure { iteration: 5, .. })
    ));
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

/// Endpoint whose send number `fail_at` (zero based) fails.
struct FlakyEndpoint {
    fail_at: usize,
    attempts: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Endpoint for FlakyEndpoint {
    async fn send(&mut self, _buf: &[u8]) -> datatransfer::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt == self.fail_at {
            return Err(Error::ConnectionClosed);
        }
        sleep(Duration::from_millis(1)).await;
        Ok(())
    }

    async fn recv(&mut self, _buf: &mut [u8]) -> datatransfer::Result<()> {
        unimplemented!("send-only endpoint")
    }

    async fn close(&mut self) -> datatransfer::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn sender_hands_off_partial_samples() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let endpoint = FlakyEndpoint {
        fail_at: 3,
        attempts: attempts.clone(),
        closed: closed.clone(),
    };
    let handoff: Channel = Arc::new(ChannelHandOff::new());

    let run = send(
        endpoint,
        &plan(792, 10, ReusePolicy::Reuse),
        Some(&*handoff),
    )
    .await;

    // Transfers 0..3 completed, transfer 3 failed and nothing after it ran.
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert!(closed.load(Ordering::SeqCst));
    assert!(matches!(
        run.failure,
        Some(Error::TransferFailure { iteration: 3, .. })
    ));
    assert_eq!(run.samples.len(), 3);
    assert!(run.samples.iter().all(|s| s.elapsed >= Duration::from_millis(1)));
    assert_eq!(run.states.last(), Some(&RoleState::Closed));

    let handed = samples(&handoff).await;
    assert_eq!(handed, run.samples);

    let report = ThroughputReport::from_samples(792, &handed);
    assert_eq!(report.iterations.len(), 3);
    assert_eq!(report.total_bytes, 3 * 792);
}

#[tokio::test]
async fn sender_with_first_transfer_failing_hands_off_nothing() {
    let endpoint = FlakyEndpoint {
        fail_at: 0,
        attempts: Arc::new(AtomicUsize::new(0)),
        closed: Arc::new(AtomicBool::new(false)),
    };
    let handoff: Channel = Arc::new(ChannelHandOff::new());
    let run = send(
        endpoint,
        &plan(792, 10, ReusePolicy::Fresh),
        Some(&*handoff),
    )
    .await;
    assert!(run.failure.is_some());
    assert!(samples(&handoff).await.is_empty());
}

#[tokio::test]
async fn configuration_errors_precede_io() {
    let handoff: Channel = Arc::new(ChannelHandOff::new());
    let sender = BenchConfig {
        role: Role::Sender,
        port: 0,
        address: "127.0.0.1".to_string(),
        ..Default::default()
    };
    let res = run_sender_role::<TcpStream>(&sender, &*handoff).await;
    assert!(matches!(res, Err(Error::Configuration(_))));
    assert!(samples(&handoff).await.is_empty());

    let receiver = BenchConfig {
        n_iter: 0,
        port: 0,
        ..Default::default()
    };
    let res = run_receiver_role::<TcpListener>(&receiver, &*handoff).await;
    assert!(matches!(res, Err(Error::Configuration(_))));
}

#[tokio::test]
async fn unreachable_receiver_is_fatal() {
    // Grab a free port, then release it so nothing listens there.
    let port = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    };
    let handoff: Channel = Arc::new(ChannelHandOff::new());
    let config = BenchConfig {
        role: Role::Sender,
        address: "127.0.0.1".to_string(),
        port,
        n_bytes: 792,
        ..Default::default()
    };
    let res = run_sender_role::<TcpStream>(&config, &*handoff).await;
    assert!(matches!(res, Err(Error::Io(_))));
    assert!(samples(&handoff).await.is_empty());
}

#[tokio::test]
#[serial]
async fn end_to_end_default_payload() {
    let handoff: Channel = Arc::new(ChannelHandOff::new());
    let receiver_config = BenchConfig {
        port: 0,
        role: Role::Receiver,
        ..Default::default()
    };
    let receiver = {
        let handoff = handoff.clone();
        tokio::spawn(async move {
            run_receiver_role::<TcpListener>(&receiver_config, &*handoff).await
        })
    };
    let port = bound_port(&handoff).await;

    let sender_config = BenchConfig {
        role: Role::Sender,
        address: "127.0.0.1".to_string(),
        port,
        ..Default::default()
    };
    assert_eq!(sender_config.n_bytes, 115_000_000);
    assert_eq!(sender_config.n_iter, 20);
    let sent = run_sender_role::<TcpStream>(&sender_config, &*handoff)
        .await
        .unwrap();
    let report = receiver.await.unwrap().unwrap();
    assert_eq!(report.transfers, 20);

    let handed = samples(&handoff).await;
    assert_eq!(handed, sent);
    let report = ThroughputReport::from_samples(sender_config.n_bytes, &handed);
    let sum: f64 = handed.iter().map(|s| s.elapsed.as_secs_f64()).sum();
    let expected = 20.0 * 115_000_000.0 / sum;
    let aggregate = report.aggregate_bytes_per_sec.unwrap();
    assert!((aggregate - expected).abs() / expected < 1e-6);
    assert_eq!(report.iterations.len(), 20);
    for (it, sample) in report.iterations.iter().zip(&handed) {
        let expected = 115_000_000.0 / sample.elapsed.as_secs_f64();
        assert!((it.bytes_per_sec.unwrap() - expected).abs() / expected < 1e-9);
    }
}

#[tokio::test]
async fn streaming_receiver_reports_until_peer_closes() {
    let listener = StreamListener::<TcpListener>::bind(0).await.unwrap();
    let port = listener.port();
    let queue = Arc::new(HandoffQueue::unbounded());
    let stop = StopSource::new();
    let receiver = tokio::spawn(receive_stream(listener, 4096, queue.clone(), stop.token()));

    let endpoint = StreamEndpoint::<TcpStream>::connect("127.0.0.1", port)
        .await
        .unwrap();
    send(endpoint, &plan(4096, 10, ReusePolicy::Reuse), None)
        .await
        .into_result()
        .unwrap();

    assert_eq!(receiver.await.unwrap().unwrap(), 10);
    let iterations: Vec<usize> = queue
        .drain_all_nonblocking()
        .iter()
        .map(|s| s.iteration)
        .collect();
    assert_eq!(iterations, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn streaming_receiver_honours_stop() {
    let listener = StreamListener::<TcpListener>::bind(0).await.unwrap();
    let port = listener.port();
    let queue = Arc::new(HandoffQueue::unbounded());
    let stop = StopSource::new();
    let receiver = tokio::spawn(receive_stream(listener, 512, queue.clone(), stop.token()));

    let mut endpoint = StreamEndpoint::<TcpStream>::connect("127.0.0.1", port)
        .await
        .unwrap();
    for _ in 0..3 {
        endpoint.send(&[1u8; 512]).await.unwrap();
    }
    timeout(Duration::from_secs(5), async {
        while queue.len() < 3 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("samples never arrived");

    stop.stop();
    let received = timeout(Duration::from_secs(5), receiver)
        .await
        .expect("stream receiver ignored stop")
        .unwrap()
        .unwrap();
    assert_eq!(received, 3);
}
