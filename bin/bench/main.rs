use anyhow::{Context, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use datatransfer::bench::{
    BenchConfig, CoordinatorMessage, HandOff, LineHandOff, Role, ThroughputReport,
    run_receiver_role, run_sender_role,
};
use datatransfer::net::utils::resolve;
use std::process::Stdio;
use tokio::net::{TcpListener, TcpStream};
use tokio::process::Command as ProcessCommand;
use tracing::{info, warn};
use tracing_chrome::{ChromeLayerBuilder, FlushGuard};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt, prelude::*};

fn cli() -> Command {
    Command::new("transfer_bench")
        .about("Times repeated bulk transfers between a sender and a receiver")
        .arg(
            Arg::new("role")
                .long("role")
                .value_parser(["sender", "receiver", "client", "server"])
                .help("Which side of the transfer to run"),
        )
        .arg(
            Arg::new("n_bytes")
                .long("n-bytes")
                .value_parser(value_parser!(usize))
                .help("Payload size of every transfer"),
        )
        .arg(
            Arg::new("n_iter")
                .long("n-iter")
                .value_parser(value_parser!(usize))
                .help("Number of transfers"),
        )
        .arg(
            Arg::new("no_reuse")
                .long("no-reuse")
                .action(ArgAction::SetTrue)
                .help("Allocate a fresh buffer for every transfer"),
        )
        .arg(
            Arg::new("address")
                .long("address")
                .help("Receiver address the sender dials [env: PEER_HOSTNAME]"),
        )
        .arg(
            Arg::new("port")
                .long("port")
                .value_parser(value_parser!(u16))
                .help("Receiver port, 0 for an ephemeral one"),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("JSON file with benchmark settings"),
        )
        .arg(
            Arg::new("trace")
                .long("trace")
                .help("Write a Chrome trace of the transfers to this file"),
        )
        .arg(
            Arg::new("worker")
                .long("worker")
                .action(ArgAction::SetTrue)
                .hide(true),
        )
}

fn load_config(matches: &ArgMatches) -> anyhow::Result<BenchConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => BenchConfig::from_json_file(path)?,
        None => BenchConfig::default(),
    };
    if let Ok(peer) = std::env::var("PEER_HOSTNAME") {
        config.address = peer;
    }
    if let Some(role) = matches.get_one::<String>("role") {
        config.role = role.parse()?;
    }
    if let Some(n_bytes) = matches.get_one::<usize>("n_bytes") {
        config.n_bytes = *n_bytes;
    }
    if let Some(n_iter) = matches.get_one::<usize>("n_iter") {
        config.n_iter = *n_iter;
    }
    if matches.get_flag("no_reuse") {
        config.reuse_alloc = false;
    }
    if let Some(address) = matches.get_one::<String>("address") {
        config.address = address.clone();
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config.port = *port;
    }
    config.validate()?;
    Ok(config)
}

fn init_tracing(trace_file: Option<&String>) -> anyhow::Result<Option<FlushGuard>> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse(std::env::var("RUST_LOG").unwrap_or_else(|_| "datatransfer=info".to_string()))?;
    let fmt_layer = fmt::layer().with_writer(std::io::stderr);

    let (chrome_layer, guard) = match trace_file {
        Some(path) => {
            let (layer, guard) = ChromeLayerBuilder::new().file(path).build();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .with(chrome_layer)
        .init();
    Ok(guard)
}

/// Runs one role in this process. Hand-off messages go to stdout as JSON
/// lines, everything else goes to stderr.
async fn run_worker(config: &BenchConfig) -> anyhow::Result<()> {
    let handoff = LineHandOff::<CoordinatorMessage, _, _>::writer(tokio::io::stdout());
    match config.role {
        Role::Receiver => {
            let report = run_receiver_role::<TcpListener>(config, &handoff).await?;
            info!(
                "Receiver done: {} transfers, {} allocations",
                report.transfers, report.allocations
            );
        }
        Role::Sender => {
            let samples = run_sender_role::<TcpStream>(config, &handoff).await?;
            info!("Sender done: {} samples", samples.len());
        }
    }
    Ok(())
}

fn worker_args(config: &BenchConfig, trace_file: Option<&String>) -> Vec<String> {
    let mut args = vec![
        "--worker".to_string(),
        "--role".to_string(),
        config.role.to_string(),
        "--n-bytes".to_string(),
        config.n_bytes.to_string(),
        "--n-iter".to_string(),
        config.n_iter.to_string(),
        "--address".to_string(),
        config.address.clone(),
        "--port".to_string(),
        config.port.to_string(),
    ];
    if !config.reuse_alloc {
        args.push("--no-reuse".to_string());
    }
    if let Some(path) = trace_file {
        args.push("--trace".to_string());
        args.push(path.clone());
    }
    args
}

/// Launches the role as a child process and reports what it hands back.
async fn run_coordinator(config: &BenchConfig, trace_file: Option<&String>) -> anyhow::Result<()> {
    if config.role == Role::Sender {
        let peer = resolve(&config.address, config.port)
            .with_context(|| format!("resolving receiver {}", config.address))?;
        info!("Receiver resolves to {}", peer);
    }
    let exe = std::env::current_exe().context("locating own executable")?;
    let mut child = ProcessCommand::new(exe)
        .args(worker_args(config, trace_file))
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .context("spawning role worker")?;
    let stdout = child.stdout.take().context("worker stdout not captured")?;
    let handoff = LineHandOff::<CoordinatorMessage, _, _>::reader(stdout);

    let message = handoff.get().await;
    match (config.role, message) {
        (Role::Receiver, Ok(CoordinatorMessage::BoundPort(port))) => {
            println!("Receiver listening on port {}", port);
        }
        (Role::Sender, Ok(CoordinatorMessage::Samples(samples))) => {
            if samples.len() < config.n_iter {
                warn!(
                    "Only {} of {} transfers completed",
                    samples.len(),
                    config.n_iter
                );
            }
            println!("{}", ThroughputReport::from_samples(config.n_bytes, &samples));
        }
        (role, Ok(other)) => warn!("Unexpected hand-off from {} worker: {:?}", role, other),
        (role, Err(e)) => warn!("No hand-off from {} worker: {}", role, e),
    }

    let status = child.wait().await.context("waiting for role worker")?;
    if !status.success() {
        bail!("{} worker exited with {}", config.role, status);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();
    let trace_file = matches.get_one::<String>("trace");
    let worker = matches.get_flag("worker");
    let _guard = if worker {
        init_tracing(trace_file)?
    } else {
        init_tracing(None)?
    };

    let config = load_config(&matches)?;
    info!("Running {} with {:?}", config.role, config);
    if worker {
        run_worker(&config).await
    } else {
        run_coordinator(&config, trace_file).await
    }
}
