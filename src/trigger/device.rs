//! Linux evdev key source
//!
//! The device is read on its own thread (reads block with no timeout) and
//! key edges are handed over a channel. The thread exits on the first event
//! after the source is dropped, which also releases the grab.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use evdev::{Device, EventType};
use std::io::ErrorKind;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::TriggerError;
use crate::trigger::{KeyEdge, TriggerEvent, TriggerSource};

pub struct EvdevSource {
    rx: Receiver<Result<TriggerEvent, TriggerError>>,
    path: String,
}

impl EvdevSource {
    /// Open `path`, optionally grabbing it so key presses don't reach other clients
    pub fn open(path: &Path, grab: bool) -> Result<Self, TriggerError> {
        let display = path.display().to_string();

        let mut device = Device::open(path).map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => TriggerError::PermissionDenied(display.clone()),
            _ => TriggerError::OpenFailed {
                path: display.clone(),
                reason: e.to_string(),
            },
        })?;

        if grab {
            device.grab().map_err(|_| TriggerError::GrabFailed(display.clone()))?;
        }

        let device_path = display.as_str();
        tracing::info!(
            "Trigger device {} ({})",
            device_path,
            device.name().unwrap_or("unnamed")
        );

        let (tx, rx) = crossbeam_channel::bounded(64);
        thread::Builder::new()
            .name("evdev-reader".to_string())
            .spawn(move || read_loop(device, tx))
            .map_err(|e| TriggerError::OpenFailed {
                path: display.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self { rx, path: display })
    }
}

fn read_loop(mut device: Device, tx: Sender<Result<TriggerEvent, TriggerError>>) {
    loop {
        let events = match device.fetch_events() {
            Ok(events) => events,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!("Trigger device read failed: {}", e);
                let _ = tx.send(Err(TriggerError::Disconnected));
                return;
            }
        };

        for event in events {
            if event.event_type() != EventType::KEY {
                continue;
            }
            let Some(edge) = KeyEdge::from_value(event.value()) else {
                continue;
            };
            let edge = TriggerEvent {
                timestamp: Instant::now(),
                code: event.code(),
                edge,
            };
            if tx.send(Ok(edge)).is_err() {
                // source dropped
                return;
            }
        }
    }
}

impl TriggerSource for EvdevSource {
    fn next_event(&mut self, timeout: Duration) -> Result<Option<TriggerEvent>, TriggerError> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(event)) => Ok(Some(event)),
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("Trigger reader for {} exited", self.path);
                Err(TriggerError::Disconnected)
            }
        }
    }
}
