//! vox-send
//!
//! Captures local audio and streams it to a vox-listen peer over UDP until
//! interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vox_relay::{
    audio::{AudioBackend, CpalBackend, ToneBackend},
    config::AppConfig,
    metrics::{MetricsReporter, PipelineStats},
    network::Endpoint,
    pipeline::CapturePipeline,
    signal::{StopSignal, TerminationSignals},
    sink::{PactlProvisioner, SinkLifecycle},
};

#[derive(Parser, Debug)]
#[command(name = "vox-send", version, about = "Stream local audio to a vox-listen peer")]
struct Args {
    /// Target IP (remembered for next time)
    #[arg(long)]
    ip: Option<IpAddr>,

    /// Target UDP port
    #[arg(long)]
    port: Option<u16>,

    /// Create the virtual sink and route audio through it for the session
    #[arg(long)]
    auto_sink: bool,

    /// Send a 440 Hz test tone instead of the input device
    #[arg(long)]
    test_tone: bool,

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

    let ip = args
        .ip
        .or(config.network.target_ip)
        .context("No target IP given and none remembered; pass --ip")?;
    if args.ip.is_some() {
        if let Some(path) = &config_path {
            if let Err(e) = config.remember_target(ip, path) {
                tracing::warn!("Could not remember target: {}", e);
            }
        }
    }
    let peer = Endpoint::new(ip, config.network.port);

    // Installed before the sink is touched so no signal can skip its teardown
    let mut signals = TerminationSignals::install().context("Could not install signal handlers")?;
    let stop = StopSignal::new();
    let interrupt = stop.clone();
    tokio::spawn(async move {
        if let Some(request) = signals.recv().await {
            tracing::info!("Received {}, stopping", request);
            interrupt.stop();
        }
    });

    let mut sink = None;
    if args.auto_sink {
        let mut lifecycle = SinkLifecycle::new(Box::new(PactlProvisioner::new()), config.sink.name.clone());
        if let Err(e) = lifecycle.ensure() {
            lifecycle.teardown();
            return Err(e).context("Could not set up the virtual sink");
        }
        sink = Some(lifecycle);
    }

    let backend: Box<dyn AudioBackend> = if args.test_tone {
        Box::new(ToneBackend)
    } else {
        Box::new(CpalBackend)
    };

    let stats = PipelineStats::new();
    let mut reporter = MetricsReporter::spawn(stats.clone(), "send", args.verbose)?;

    tracing::info!("vox-send -> {}", peer);

    let config = Arc::new(config);
    let run_stop = stop.clone();
    let result = tokio::task::spawn_blocking(move || {
        let pipeline = CapturePipeline::open(&config, peer, backend.as_ref(), stats)?;
        pipeline.run(&run_stop)
    })
    .await?;

    reporter.stop();
    tracing::info!("Average {:.1} packets/s over the last 10s", reporter.average());
    if let Some(mut sink) = sink {
        sink.teardown();
    }

    result.context("Capture failed")
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
