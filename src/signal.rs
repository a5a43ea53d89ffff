//! Cooperative cancellation
//!
//! Workers poll a [`StopSignal`] at every loop iteration and after every
//! blocking call returns. Interrupt handlers only ever set it.
//!
//! [`TerminationSignals`] turns Ctrl+C, SIGTERM and SIGHUP into one awaitable
//! request so binaries can wind down and restore routing instead of dying on
//! the default signal action.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared "keep running" flag; cloning shares the flag
#[derive(Debug, Clone)]
pub struct StopSignal {
    running: Arc<AtomicBool>,
}

impl StopSignal {
    /// A signal in the running state
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        !self.is_running()
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Which request asked the process to end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Interrupt,
    Terminate,
    Hangup,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Interrupt => write!(f, "interrupt"),
            Termination::Terminate => write!(f, "terminate"),
            Termination::Hangup => write!(f, "hangup"),
        }
    }
}

/// Handlers for every signal that should end the process cleanly
///
/// Handlers are registered by [`install`](Self::install) itself, so a signal
/// arriving before the first [`recv`](Self::recv) is queued, not fatal.
pub struct TerminationSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    /// Must be called from inside a tokio runtime
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next request; `None` once the runtime can no longer deliver signals
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Option<Termination> {
        tokio::select! {
            Some(()) = self.interrupt.recv() => Some(Termination::Interrupt),
            Some(()) = self.terminate.recv() => Some(Termination::Terminate),
            Some(()) = self.hangup.recv() => Some(Termination::Hangup),
            else => None,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Option<Termination> {
        tokio::signal::ctrl_c().await.ok().map(|()| Termination::Interrupt)
    }
}
