//! vox-listen
//!
//! Receives a vox-send stream and plays it on the local output device.
//! With `--probe` it only reports the datagrams it sees.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vox_relay::{
    audio::CpalBackend,
    config::{AppConfig, MAX_DATAGRAM_SIZE},
    metrics::{MetricsReporter, PipelineStats},
    network::{Received, UdpTransport},
    pipeline::PlaybackPipeline,
    signal::{StopSignal, TerminationSignals},
};

#[derive(Parser, Debug)]
#[command(name = "vox-listen", version, about = "Play a vox-send stream")]
struct Args {
    /// Local address to listen on (remembered for next time)
    #[arg(long)]
    listen_ip: Option<IpAddr>,

    /// UDP port
    #[arg(long)]
    port: Option<u16>,

    /// Log incoming datagrams instead of playing them
    #[arg(long)]
    probe: bool,

    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "VOX_CONFIG")]
    config: Option<PathBuf>,

    /// Log packet counts and levels every second
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = args.config.clone().or_else(AppConfig::default_path);
    let mut config = match &config_path {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::default(),
    };
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(ip) = args.listen_ip {
        if let Some(path) = &config_path {
            if let Err(e) = config.remember_listen(ip, path) {
                tracing::warn!("Could not remember listen address: {}", e);
            }
        } else {
            config.network.listen_ip = ip;
        }
    }
    let listen = SocketAddr::new(config.network.listen_ip, config.network.port);

    let mut signals = TerminationSignals::install().context("Could not install signal handlers")?;
    let stop = StopSignal::new();
    let interrupt = stop.clone();
    tokio::spawn(async move {
        if let Some(request) = signals.recv().await {
            tracing::info!("Received {}, stopping", request);
            interrupt.stop();
        }
    });

    let config = Arc::new(config);
    let run_stop = stop.clone();

    if args.probe {
        let timeout = config.session.receive_timeout();
        return tokio::task::spawn_blocking(move || probe(listen, timeout, &run_stop))
            .await?
            .context("Probe failed");
    }

    let stats = PipelineStats::new();
    let mut reporter = MetricsReporter::spawn(stats.clone(), "listen", args.verbose)?;

    let result = tokio::task::spawn_blocking(move || {
        let pipeline = PlaybackPipeline::open(&config, listen, &CpalBackend, stats)?;
        pipeline.run(&run_stop)
    })
    .await?;

    reporter.stop();
    result.context("Playback failed")
}

/// Print the size and source of every datagram
fn probe(listen: SocketAddr, timeout: std::time::Duration, stop: &StopSignal) -> vox_relay::Result<()> {
    let transport = UdpTransport::bind(listen, timeout)?;
    tracing::info!("Probing on {}; Ctrl+C to quit", transport.local_addr());

    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    while stop.is_running() {
        match transport.receive(&mut buf)? {
            Received::Datagram { len, from } => tracing::info!("got {} bytes from {}", len, from),
            Received::Timeout => {}
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
