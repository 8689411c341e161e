use clap::{Arg, ArgAction, Command, value_parser};
use datatransfer::ingest::{DEFAULT_INGEST_PORT, FrameSimulator};
use datatransfer::shutdown::StopSource;
use env_logger;
use log::{info, warn};
use tokio::net::TcpStream;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let matches = Command::new("frame_sim")
        .about("Streams synthetic frames to an ingest listener")
        .arg(
            Arg::new("HOST")
                .required(true)
                .index(1)
                .help("Host the ingest listener runs on"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_parser(value_parser!(u16))
                .help("Listener port [default: 45405]"),
        )
        .arg(
            Arg::new("count")
                .long("count")
                .value_parser(value_parser!(u64))
                .default_value("16000")
                .help("Number of frames to send"),
        )
        .arg(
            Arg::new("unpaced")
                .long("unpaced")
                .action(ArgAction::SetTrue)
                .help("Send frames back to back instead of at the sampling rate"),
        )
        .get_matches();
    let host = matches
        .get_one::<String>("HOST")
        .ok_or_else(|| anyhow::anyhow!("missing HOST"))?;
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .unwrap_or(DEFAULT_INGEST_PORT);
    let count = matches.get_one::<u64>("count").copied().unwrap_or(16000);

    let mut sim = FrameSimulator::<TcpStream>::connect(host, port).await?;
    if matches.get_flag("unpaced") {
        sim = sim.unpaced();
    }
    info!(
        "Sending {} frames every {:?}",
        count,
        FrameSimulator::<TcpStream>::frame_period()
    );

    let stop = StopSource::new();
    let token = stop.token();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current frame");
            stop.stop();
        }
    });
    let sent = sim.run(count, token).await?;
    sim.close().await?;
    info!("Sent {} frames", sent);
    Ok(())
}
