//! Hardware trigger input
//!
//! A [`TriggerSource`] yields raw key edges. The [`TriggerWatcher`] runs
//! them through a [`TriggerDebouncer`] and forwards each accepted press to
//! the session controller as [`Command::Toggle`].

pub mod debounce;
#[cfg(target_os = "linux")]
pub mod device;

pub use debounce::{CooldownGate, TriggerDebouncer};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::TriggerConfig;
use crate::error::TriggerError;
use crate::session::Command;
use crate::signal::StopSignal;

/// How long a source may block before the watcher re-checks its stop signal
const WATCH_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Key state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEdge {
    Release,
    Press,
    /// Auto-repeat while held
    Repeat,
}

impl KeyEdge {
    /// Map a Linux input event value (0, 1, 2)
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(KeyEdge::Release),
            1 => Some(KeyEdge::Press),
            2 => Some(KeyEdge::Repeat),
            _ => None,
        }
    }
}

/// One raw key edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub timestamp: Instant,
    pub code: u16,
    pub edge: KeyEdge,
}

/// An accepted trigger activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleEvent {
    pub timestamp: Instant,
}

/// Live stream of raw key edges
pub trait TriggerSource: Send {
    /// Next edge, or `Ok(None)` if nothing arrived within `timeout`
    fn next_event(&mut self, timeout: Duration) -> Result<Option<TriggerEvent>, TriggerError>;
}

/// Source fed through a channel
pub struct ChannelSource {
    rx: Receiver<TriggerEvent>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<TriggerEvent>) -> Self {
        Self { rx }
    }

    /// A source and the sender that feeds it
    pub fn pair() -> (Sender<TriggerEvent>, Self) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (tx, Self::new(rx))
    }
}

impl TriggerSource for ChannelSource {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<TriggerEvent>, TriggerError> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TriggerError::Disconnected),
        }
    }
}

/// Open the platform trigger device
pub fn open_device(path: &Path) -> Result<Box<dyn TriggerSource>, TriggerError> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(device::EvdevSource::open(path, true)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = path;
        Err(TriggerError::Unsupported)
    }
}

/// Debounces a source into controller commands
pub struct TriggerWatcher {
    source: Box<dyn TriggerSource>,
    debouncer: TriggerDebouncer,
}

impl TriggerWatcher {
    pub fn new(source: Box<dyn TriggerSource>, config: &TriggerConfig) -> Self {
        Self {
            source,
            debouncer: TriggerDebouncer::new(config.key_code, config.cooldown()),
        }
    }

    /// Forward toggles until `stop` clears, the controller hangs up or the source fails
    pub fn run(mut self, commands: &Sender<Command>, stop: &StopSignal) -> Result<(), TriggerError> {
        tracing::info!(
            "Watching for key code {} (cooldown {:?})",
            self.debouncer.key_code(),
            self.debouncer.cooldown()
        );

        while stop.is_running() {
            let event = match self.source.next_event(WATCH_POLL_INTERVAL)? {
                Some(event) => event,
                None => continue,
            };

            if self.debouncer.process(&event).is_some() {
                tracing::info!("Trigger pressed");
                if commands.send(Command::Toggle).is_err() {
                    tracing::debug!("Controller gone, trigger watcher exiting");
                    break;
                }
            }
        }
        Ok(())
    }
}
