//! vox-commander
//!
//! Watches a hardware key and toggles a relay session on each accepted
//! press. Send sessions get the virtual sink provisioned around them.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vox_relay::{
    audio::CpalBackend,
    config::{AppConfig, WorkerBackend},
    network::Endpoint,
    session::{Command, ProcessLauncher, SessionController, SessionRequest, ThreadLauncher, WorkerLauncher},
    signal::{StopSignal, TerminationSignals},
    sink::{PactlProvisioner, SinkLifecycle},
    trigger::{self, TriggerWatcher},
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    /// Run pipelines in this process
    Thread,
    /// Run vox-send / vox-listen as child processes
    Process,
}

#[derive(Parser, Debug)]
#[command(name = "vox-commander", version, about = "Toggle the audio relay from a hardware key")]
struct Args {
    /// Input device path (e.g. /dev/input/event5)
    #[arg(long = "evdev")]
    evdev_path: Option<PathBuf>,

    /// Trigger key code, decimal or 0x-prefixed hex (168 is KEY_REWIND)
    #[arg(long, value_parser = parse_key_code)]
    code: Option<u16>,

    /// Seconds between accepted presses
    #[arg(long)]
    cooldown: Option<f64>,

    /// Target IP for send sessions
    #[arg(long)]
    ip: Option<IpAddr>,

    /// UDP port
    #[arg(long)]
    port: Option<u16>,

    /// Toggle a receive session instead of a send session
    #[arg(long)]
    receive: bool,

    /// Don't provision the virtual sink
    #[arg(long)]
    no_sink: bool,

    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "VOX_CONFIG")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

fn parse_key_code(value: &str) -> Result<u16, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid key code {:?}: {}", value, e))
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
    if let Some(path) = args.evdev_path.clone() {
        config.trigger.device_path = path;
    }
    if let Some(code) = args.code {
        config.trigger.key_code = code;
    }
    if let Some(seconds) = args.cooldown {
        anyhow::ensure!(seconds >= 0.0, "--cooldown must not be negative");
        config.trigger.cooldown_ms = (seconds * 1000.0).round() as u64;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if let Some(backend) = args.backend {
        config.session.backend = match backend {
            Backend::Thread => WorkerBackend::Thread,
            Backend::Process => WorkerBackend::Process,
        };
    }
    if args.no_sink {
        config.session.auto_sink = false;
    }
    config.validate()?;

    let target = if args.receive {
        SessionRequest::receive(Endpoint::new(config.network.listen_ip, config.network.port))
    } else {
        let ip = args
            .ip
            .or(config.network.target_ip)
            .context("No target IP given and none remembered; pass --ip")?;
        SessionRequest::send(Endpoint::new(ip, config.network.port))
    };

    let mut signals = TerminationSignals::install().context("Could not install signal handlers")?;

    let source = trigger::open_device(&config.trigger.device_path)
        .with_context(|| format!("Could not open trigger device {}", config.trigger.device_path.display()))?;

    let config = Arc::new(config);
    let launcher: Box<dyn WorkerLauncher> = match config.session.backend {
        WorkerBackend::Thread => Box::new(ThreadLauncher::new(config.clone(), Arc::new(CpalBackend))),
        WorkerBackend::Process => Box::new(ProcessLauncher::new(args.config.clone(), args.verbose)?),
    };
    let sink = SinkLifecycle::new(Box::new(PactlProvisioner::new()), config.sink.name.clone());
    let mut controller = SessionController::new(config.clone(), launcher, sink, target.clone()).verbose(args.verbose);

    let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
    let stop = StopSignal::new();

    let watcher = TriggerWatcher::new(source, &config.trigger);
    let watcher_tx = commands_tx.clone();
    let watcher_stop = stop.clone();
    let watcher_handle = thread::Builder::new()
        .name("trigger".to_string())
        .spawn(move || {
            if let Err(e) = watcher.run(&watcher_tx, &watcher_stop) {
                tracing::error!("Trigger watcher failed: {}", e);
                let _ = watcher_tx.send(Command::Shutdown);
            }
        })?;

    let interrupt_tx = commands_tx.clone();
    tokio::spawn(async move {
        if let Some(request) = signals.recv().await {
            tracing::info!("Received {}, shutting down", request);
            let _ = interrupt_tx.send(Command::Shutdown);
        }
    });
    drop(commands_tx);

    tracing::info!(
        "vox-commander ready: key {} toggles {} session ({})",
        config.trigger.key_code,
        target.direction,
        target.endpoint
    );

    tokio::task::spawn_blocking(move || controller.run(&commands_rx)).await?;

    stop.stop();
    if watcher_handle.join().is_err() {
        tracing::warn!("Trigger watcher panicked");
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
