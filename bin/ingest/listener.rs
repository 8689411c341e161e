use anyhow::Context;
use clap::{Arg, Command, value_parser};
use datatransfer::ingest::{Frame, IngestConfig, IngestHandle};
use datatransfer::net::utils::my_name;
use datatransfer::queue::HandoffQueue;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse("datatransfer=info")?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(filter))
        .init();

    let matches = Command::new("ingest")
        .about("Receives fixed-size frames from one source and prints them")
        .arg(
            Arg::new("address")
                .long("address")
                .help("Address to bind, defaults to this host's name"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_parser(value_parser!(u16))
                .default_value("45405"),
        )
        .arg(
            Arg::new("frame_len")
                .long("frame-len")
                .value_parser(value_parser!(usize))
                .default_value("792"),
        )
        .arg(
            Arg::new("capacity")
                .long("capacity")
                .value_parser(value_parser!(usize))
                .help("Bound the frame queue, unbounded if omitted"),
        )
        .arg(
            Arg::new("poll_ms")
                .long("poll-ms")
                .value_parser(value_parser!(u64))
                .default_value("100")
                .help("Polling cadence in milliseconds"),
        )
        .get_matches();

    let address = match matches.get_one::<String>("address") {
        Some(address) => address.clone(),
        None => my_name().context("looking up hostname")?,
    };
    let mut config = IngestConfig::new(address, *matches.get_one::<u16>("port").context("port")?);
    config.frame_len = *matches
        .get_one::<usize>("frame_len")
        .context("frame_len")?;
    let queue = Arc::new(match matches.get_one::<usize>("capacity") {
        Some(capacity) => HandoffQueue::bounded(*capacity)?,
        None => HandoffQueue::unbounded(),
    });
    let cadence = Duration::from_millis(*matches.get_one::<u64>("poll_ms").context("poll_ms")?);

    let handle = IngestHandle::spawn(&config, queue.clone())?;
    info!("Listening for frames on {}", handle.local_addr());

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut ticker = tokio::time::interval(cadence);
    let summary = loop {
        tokio::select! {
            _ = ticker.tick() => {
                print_frames(&handle.poll());
                if handle.is_finished() {
                    debug!("Listener thread finished");
                    break handle.join()?;
                }
            }
            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down...");
                break handle.shutdown()?;
            }
        }
    };
    // Frames decoded between the last poll and the stop.
    print_frames(&queue.drain_all_nonblocking());
    info!("Ingest ended after {} frames ({:?})", summary.frames, summary.end);
    Ok(())
}

fn print_frames(frames: &[Frame]) {
    for frame in frames {
        println!(
            "frame id={} version={} fs={} fs_nr={} samples={} error={}",
            frame.id,
            frame.protocol_version,
            frame.fs,
            frame.fs_nr,
            frame.samples,
            frame.sample_error
        );
    }
}
