//! Virtual sink lifecycle
//!
//! A send session can route the host's default output into a dedicated
//! null sink so that its monitor becomes the capture source. The
//! [`SinkLifecycle`] creates that sink on demand and puts the host routing
//! back the way it found it afterwards.
//!
//! Only what was actually done is undone: each step of `ensure()` is
//! recorded in [`SinkState`] as it succeeds, so a teardown after a partial
//! failure reverts exactly those steps. A sink that already existed before
//! `ensure()` is never touched.

pub mod pactl;

pub use pactl::PactlProvisioner;

use crate::error::SinkError;

/// A sink created by a provisioner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkHandle {
    pub name: String,
    /// Provisioner-specific id (the module index for PulseAudio)
    pub id: u32,
}

/// Host default routing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingDefaults {
    pub sink: Option<String>,
    pub source: Option<String>,
}

/// Host audio routing operations
pub trait SinkProvisioner: Send {
    /// Whether a sink called `name` exists
    fn probe(&self, name: &str) -> Result<bool, SinkError>;

    fn create(&self, name: &str) -> Result<SinkHandle, SinkError>;

    fn read_defaults(&self) -> Result<RoutingDefaults, SinkError>;

    fn set_default_sink(&self, name: &str) -> Result<(), SinkError>;

    fn set_default_source(&self, name: &str) -> Result<(), SinkError>;

    fn remove(&self, handle: &SinkHandle) -> Result<(), SinkError>;

    /// Capture source that carries what is played into `sink`
    fn monitor_source(&self, sink: &str) -> String {
        format!("{}.monitor", sink)
    }
}

/// What `ensure()` found and did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkState {
    pub exists: bool,
    pub provisioned_by_us: bool,
    pub prior_default_sink: Option<String>,
    pub prior_default_source: Option<String>,
    handle: Option<SinkHandle>,
    sink_redirected: bool,
    source_redirected: bool,
}

/// Ensures the sink for one session and restores routing afterwards
pub struct SinkLifecycle {
    provisioner: Box<dyn SinkProvisioner>,
    name: String,
    state: SinkState,
}

impl SinkLifecycle {
    pub fn new(provisioner: Box<dyn SinkProvisioner>, name: impl Into<String>) -> Self {
        Self {
            provisioner,
            name: name.into(),
            state: SinkState::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &SinkState {
        &self.state
    }

    /// Make sure the sink exists and is the default route
    ///
    /// Idempotent until the next [`teardown`](Self::teardown). On error the
    /// steps already taken stay recorded, for teardown or for a later call
    /// that resumes at the first step not yet done.
    pub fn ensure(&mut self) -> Result<(), SinkError> {
        if self.state.exists && (!self.state.provisioned_by_us || self.state.source_redirected) {
            return Ok(());
        }

        if !self.state.exists {
            if self.provisioner.probe(&self.name)? {
                tracing::info!("Sink {} already present, leaving routing alone", self.name);
                self.state.exists = true;
                self.state.provisioned_by_us = false;
                return Ok(());
            }

            let prior = self.provisioner.read_defaults()?;
            self.state.prior_default_sink = prior.sink;
            self.state.prior_default_source = prior.source;

            let handle = self.provisioner.create(&self.name)?;
            tracing::info!("Created sink {} (id {})", handle.name, handle.id);
            self.state.handle = Some(handle);
            self.state.exists = true;
            self.state.provisioned_by_us = true;
        }

        if !self.state.sink_redirected {
            self.provisioner.set_default_sink(&self.name)?;
            self.state.sink_redirected = true;
        }

        let monitor = self.provisioner.monitor_source(&self.name);
        self.provisioner.set_default_source(&monitor)?;
        self.state.source_redirected = true;

        tracing::info!("Default routing now {} / {}", self.name, monitor);
        Ok(())
    }

    /// Undo whatever `ensure()` did
    ///
    /// Best-effort: every step is attempted, failures are logged and
    /// returned, and the state is reset regardless.
    pub fn teardown(&mut self) -> Vec<SinkError> {
        let state = std::mem::take(&mut self.state);
        let mut failures = Vec::new();

        if !state.provisioned_by_us {
            return failures;
        }

        if state.source_redirected {
            match &state.prior_default_source {
                Some(source) => {
                    if let Err(e) = self.provisioner.set_default_source(source) {
                        failures.push(e);
                    }
                }
                None => tracing::warn!("No prior default source recorded, not restoring it"),
            }
        }

        if state.sink_redirected {
            match &state.prior_default_sink {
                Some(sink) => {
                    if let Err(e) = self.provisioner.set_default_sink(sink) {
                        failures.push(e);
                    }
                }
                None => tracing::warn!("No prior default sink recorded, not restoring it"),
            }
        }

        if let Some(handle) = &state.handle {
            match self.provisioner.remove(handle) {
                Ok(()) => tracing::info!("Removed sink {}", handle.name),
                Err(e) => failures.push(e),
            }
        }

        for failure in &failures {
            tracing::warn!("Sink teardown: {}", failure);
        }
        failures
    }
}

impl Drop for SinkLifecycle {
    fn drop(&mut self) {
        if self.state.provisioned_by_us {
            self.teardown();
        }
    }
}

/// In-memory provisioner for tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Default)]
    pub struct HostState {
        pub sinks: Vec<String>,
        pub defaults: RoutingDefaults,
        pub creates: usize,
        pub removes: usize,
        pub fail_create: bool,
        pub fail_set_source: bool,
        pub fail_restore: bool,
    }

    #[derive(Clone, Default)]
    pub struct FakeProvisioner {
        pub host: Arc<Mutex<HostState>>,
    }

    impl FakeProvisioner {
        pub fn with_defaults(sink: &str, source: &str) -> Self {
            let fake = Self::default();
            {
                let mut host = fake.host.lock();
                host.sinks.push(sink.to_string());
                host.defaults = RoutingDefaults {
                    sink: Some(sink.to_string()),
                    source: Some(source.to_string()),
                };
            }
            fake
        }
    }

    impl SinkProvisioner for FakeProvisioner {
        fn probe(&self, name: &str) -> Result<bool, SinkError> {
            Ok(self.host.lock().sinks.iter().any(|s| s == name))
        }

        fn create(&self, name: &str) -> Result<SinkHandle, SinkError> {
            let mut host = self.host.lock();
            if host.fail_create {
                return Err(SinkError::CreateFailed {
                    name: name.to_string(),
                    reason: "module refused".to_string(),
                });
            }
            host.creates += 1;
            host.sinks.push(name.to_string());
            Ok(SinkHandle {
                name: name.to_string(),
                id: 40 + host.creates as u32,
            })
        }

        fn read_defaults(&self) -> Result<RoutingDefaults, SinkError> {
            Ok(self.host.lock().defaults.clone())
        }

        fn set_default_sink(&self, name: &str) -> Result<(), SinkError> {
            let mut host = self.host.lock();
            if host.fail_restore && name != "vox_meter" {
                return Err(SinkError::SetDefaultFailed {
                    kind: "sink",
                    target: name.to_string(),
                    reason: "no such entity".to_string(),
                });
            }
            host.defaults.sink = Some(name.to_string());
            Ok(())
        }

        fn set_default_source(&self, name: &str) -> Result<(), SinkError> {
            let mut host = self.host.lock();
            if host.fail_set_source {
                return Err(SinkError::SetDefaultFailed {
                    kind: "source",
                    target: name.to_string(),
                    reason: "no such entity".to_string(),
                });
            }
            host.defaults.source = Some(name.to_string());
            Ok(())
        }

        fn remove(&self, handle: &SinkHandle) -> Result<(), SinkError> {
            let mut host = self.host.lock();
            host.removes += 1;
            host.sinks.retain(|s| s != &handle.name);
            Ok(())
        }
    }
}
