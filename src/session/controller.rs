//! Session state machine
//!
//! ```text
//! Idle --start--> Starting --worker ready--> Running --stop/worker exit--> Stopping --> Idle
//!                    |                                                        ^
//!                    +------------------- start failure ----------------------+
//! ```
//!
//! The controller handles one transition at a time. Commands that arrive
//! while a transition is in progress are queued, with pending toggles
//! collapsed to one.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::constants::CONTROLLER_POLL_INTERVAL;
use crate::error::SessionError;
use crate::metrics::MetricsReporter;
use crate::network::Endpoint;
use crate::pipeline::Direction;
use crate::session::worker::{SessionRequest, WaitOutcome, Worker, WorkerExit, WorkerLauncher};
use crate::sink::SinkLifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Controller input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the toggle target when idle, stop otherwise
    Toggle,
    Start(SessionRequest),
    Stop,
    Shutdown,
}

/// User-facing session summary
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Idle,
    Sending { peer: Endpoint, rate: Option<f64> },
    Listening { local: Endpoint, rate: Option<f64> },
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::Sending { rate: Some(rate), .. } => write!(f, "Sending: {:.1} packets/s (last 10s)", rate),
            SessionStatus::Sending { peer, rate: None } => write!(f, "Sending to {}", peer),
            SessionStatus::Listening { rate: Some(rate), .. } => {
                write!(f, "Listening: {:.1} packets/s (last 10s)", rate)
            }
            SessionStatus::Listening { local, rate: None } => write!(f, "Listening on {}", local),
        }
    }
}

struct ActiveSession {
    request: SessionRequest,
    worker: Box<dyn Worker>,
    reporter: Option<MetricsReporter>,
    sink_engaged: bool,
}

/// Owns at most one running session
pub struct SessionController {
    config: Arc<AppConfig>,
    launcher: Box<dyn WorkerLauncher>,
    sink: SinkLifecycle,
    toggle_target: SessionRequest,
    state: SessionState,
    active: Option<ActiveSession>,
    verbose: bool,
}

impl SessionController {
    /// `toggle_target` is what a [`Command::Toggle`] starts
    pub fn new(
        config: Arc<AppConfig>,
        launcher: Box<dyn WorkerLauncher>,
        sink: SinkLifecycle,
        toggle_target: SessionRequest,
    ) -> Self {
        Self {
            config,
            launcher,
            sink,
            toggle_target,
            state: SessionState::Idle,
            active: None,
            verbose: false,
        }
    }

    /// Log per-second packet counts and levels while running
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> SessionStatus {
        match (self.state, &self.active) {
            (SessionState::Running, Some(active)) => {
                let rate = active.reporter.as_ref().map(MetricsReporter::average);
                match active.request.direction {
                    Direction::Send => SessionStatus::Sending {
                        peer: active.request.endpoint,
                        rate,
                    },
                    Direction::Receive => SessionStatus::Listening {
                        local: active.request.endpoint,
                        rate,
                    },
                }
            }
            _ => SessionStatus::Idle,
        }
    }

    /// Start a session; fails without side effects if one is already active
    pub fn start(&mut self, request: SessionRequest) -> Result<(), SessionError> {
        if let Some(active) = &self.active {
            tracing::warn!(
                "Refusing to start a {} session, a {} session is {}",
                request.direction,
                active.request.direction,
                self.state
            );
            return Err(SessionError::AlreadyRunning(active.request.direction.to_string()));
        }
        if self.state != SessionState::Idle {
            return Err(SessionError::Busy(self.state.to_string()));
        }

        self.state = SessionState::Starting;
        tracing::info!("Starting {} session ({})", request.direction, request.endpoint);

        let sink_engaged = request.direction == Direction::Send && self.config.session.auto_sink;
        if sink_engaged {
            if let Err(e) = self.sink.ensure() {
                self.sink.teardown();
                self.state = SessionState::Idle;
                tracing::error!("Session start failed: {}", e);
                return Err(e.into());
            }
        }

        let worker = match self.launcher.launch(&request) {
            Ok(worker) => worker,
            Err(e) => {
                if sink_engaged {
                    self.sink.teardown();
                }
                self.state = SessionState::Idle;
                tracing::error!("Session start failed: {}", e);
                return Err(e);
            }
        };

        let reporter = worker.stats().and_then(|stats| {
            let label = match request.direction {
                Direction::Send => "send",
                Direction::Receive => "listen",
            };
            MetricsReporter::spawn(stats, label, self.verbose)
                .map_err(|e| tracing::warn!("Metrics reporter unavailable: {}", e))
                .ok()
        });

        self.active = Some(ActiveSession {
            request,
            worker,
            reporter,
            sink_engaged,
        });
        self.state = SessionState::Running;
        tracing::info!("{}", self.status());
        Ok(())
    }

    /// Stop the active session, if any
    ///
    /// Returns to `Idle` within the grace period plus the time a forced
    /// termination takes. The sink is torn down whatever happened to the worker.
    pub fn stop(&mut self) -> Result<(), SessionError> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        self.state = SessionState::Stopping;
        tracing::info!("Stopping {} session", active.request.direction);

        let grace = self.config.session.grace_period();
        active.worker.signal_stop();
        let result = match active.worker.wait(grace) {
            WaitOutcome::Exited(WorkerExit::Completed) => Ok(()),
            WaitOutcome::Exited(WorkerExit::Failed(reason)) => {
                tracing::warn!("Session ended with error: {}", reason);
                Ok(())
            }
            WaitOutcome::TimedOut => {
                tracing::warn!("Worker ignored stop for {:?}, forcing termination", grace);
                active.worker.force_kill()
            }
        };

        self.finish(active);
        result
    }

    /// Start the toggle target when idle, stop otherwise
    pub fn toggle(&mut self) -> Result<(), SessionError> {
        if self.active.is_some() {
            self.stop()
        } else {
            self.start(self.toggle_target.clone())
        }
    }

    /// Notice a worker that ended on its own and clean up after it
    ///
    /// Returns true if the session was wound down.
    pub fn poll(&mut self) -> bool {
        let finished = match self.active.as_mut() {
            Some(active) => active.worker.is_finished(),
            None => false,
        };
        if !finished {
            return false;
        }

        if let Some(active) = self.active.take() {
            self.state = SessionState::Stopping;
            tracing::error!("{} session ended unexpectedly", active.request.direction);
            self.finish(active);
        }
        true
    }

    /// Process commands until `Shutdown` or until every sender is gone
    pub fn run(&mut self, commands: &Receiver<Command>) {
        let mut pending: VecDeque<Command> = VecDeque::new();

        loop {
            let command = match pending.pop_front() {
                Some(command) => command,
                None => match commands.recv_timeout(CONTROLLER_POLL_INTERVAL) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        self.poll();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            if command == Command::Shutdown {
                break;
            }
            self.handle(command);

            for command in commands.try_iter() {
                enqueue(&mut pending, command);
            }
        }

        self.shutdown();
    }

    /// Stop any active session
    pub fn shutdown(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!("Shutdown: {}", e);
        }
    }

    fn handle(&mut self, command: Command) {
        tracing::debug!("Handling {:?} while {}", command, self.state);
        let result = match command {
            Command::Toggle => self.toggle(),
            Command::Start(request) => self.start(request),
            Command::Stop => self.stop(),
            Command::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            tracing::error!("{}", e);
        }
    }

    fn finish(&mut self, mut active: ActiveSession) {
        if let Some(mut reporter) = active.reporter.take() {
            reporter.stop();
        }
        if active.sink_engaged {
            self.sink.teardown();
        }
        drop(active);
        self.state = SessionState::Idle;
        tracing::info!("Session stopped");
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Queue a command that arrived mid-transition
fn enqueue(pending: &mut VecDeque<Command>, command: Command) {
    if command == Command::Toggle && pending.contains(&Command::Toggle) {
        tracing::debug!("Collapsing queued toggle");
        return;
    }
    pending.push_back(command);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PipelineStats;
    use crate::sink::fake::FakeProvisioner;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Probe {
        launches: usize,
        stop_signals: usize,
        kills: usize,
    }

    /// Worker that stops on request unless told to ignore it
    struct FakeWorker {
        probe: Arc<Mutex<Probe>>,
        ignores_stop: bool,
        stopped: bool,
        crashed: Arc<Mutex<bool>>,
    }

    impl Worker for FakeWorker {
        fn signal_stop(&mut self) {
            self.probe.lock().stop_signals += 1;
            if !self.ignores_stop {
                self.stopped = true;
            }
        }

        fn is_finished(&mut self) -> bool {
            self.stopped || *self.crashed.lock()
        }

        fn wait(&mut self, timeout: Duration) -> WaitOutcome {
            if self.is_finished() {
                return WaitOutcome::Exited(WorkerExit::Completed);
            }
            std::thread::sleep(timeout);
            WaitOutcome::TimedOut
        }

        fn force_kill(&mut self) -> Result<(), SessionError> {
            self.probe.lock().kills += 1;
            self.stopped = true;
            Ok(())
        }

        fn stats(&self) -> Option<Arc<PipelineStats>> {
            None
        }
    }

    struct FakeLauncher {
        probe: Arc<Mutex<Probe>>,
        ignores_stop: bool,
        fail: bool,
        crashed: Arc<Mutex<bool>>,
    }

    impl WorkerLauncher for FakeLauncher {
        fn launch(&self, _request: &SessionRequest) -> Result<Box<dyn Worker>, SessionError> {
            if self.fail {
                return Err(SessionError::StartFailed("no such device".to_string()));
            }
            self.probe.lock().launches += 1;
            Ok(Box::new(FakeWorker {
                probe: self.probe.clone(),
                ignores_stop: self.ignores_stop,
                stopped: false,
                crashed: self.crashed.clone(),
            }))
        }
    }

    struct Harness {
        controller: SessionController,
        probe: Arc<Mutex<Probe>>,
        sink: FakeProvisioner,
        crashed: Arc<Mutex<bool>>,
    }

    fn harness(ignores_stop: bool, fail: bool) -> Harness {
        let mut config = AppConfig::default();
        config.session.grace_period_ms = 100;
        config.session.auto_sink = true;

        let probe = Arc::new(Mutex::new(Probe::default()));
        let crashed = Arc::new(Mutex::new(false));
        let sink = FakeProvisioner::with_defaults("speakers", "mic");
        let launcher = FakeLauncher {
            probe: probe.clone(),
            ignores_stop,
            fail,
            crashed: crashed.clone(),
        };

        let controller = SessionController::new(
            Arc::new(config),
            Box::new(launcher),
            SinkLifecycle::new(Box::new(sink.clone()), "vox_meter"),
            SessionRequest::send(peer()),
        );
        Harness {
            controller,
            probe,
            sink,
            crashed,
        }
    }

    fn peer() -> Endpoint {
        "10.0.0.2:5004".parse().unwrap()
    }

    #[test]
    fn test_toggle_starts_and_stops() {
        let mut h = harness(false, false);

        h.controller.toggle().unwrap();
        assert_eq!(h.controller.state(), SessionState::Running);
        assert_eq!(h.sink.host.lock().defaults.sink.as_deref(), Some("vox_meter"));
        assert_eq!(h.controller.status().to_string(), "Sending to 10.0.0.2:5004");

        h.controller.toggle().unwrap();
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.controller.status(), SessionStatus::Idle);
        assert_eq!(h.sink.host.lock().defaults.sink.as_deref(), Some("speakers"));
    }

    #[test]
    fn test_start_while_running_is_rejected() {
        let mut h = harness(false, false);
        h.controller.start(SessionRequest::send(peer())).unwrap();

        let result = h.controller.start(SessionRequest::receive("0.0.0.0:5004".parse().unwrap()));
        assert!(matches!(result, Err(SessionError::AlreadyRunning(_))));

        assert_eq!(h.controller.state(), SessionState::Running);
        assert_eq!(h.probe.lock().launches, 1);
        assert_eq!(h.probe.lock().stop_signals, 0);
        assert_eq!(h.sink.host.lock().creates, 1);
    }

    #[test]
    fn test_stuck_worker_is_killed_within_grace_period() {
        let mut h = harness(true, false);
        h.controller.start(SessionRequest::send(peer())).unwrap();

        let started = Instant::now();
        h.controller.stop().unwrap();
        let elapsed = started.elapsed();

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(100) + Duration::from_millis(500));
        assert_eq!(h.probe.lock().kills, 1);
        assert_eq!(h.sink.host.lock().removes, 1);
    }

    #[test]
    fn test_launch_failure_returns_to_idle_and_restores_sink() {
        let mut h = harness(false, true);

        assert!(matches!(h.controller.toggle(), Err(SessionError::StartFailed(_))));
        assert_eq!(h.controller.state(), SessionState::Idle);

        let host = h.sink.host.lock();
        assert_eq!(host.creates, 1);
        assert_eq!(host.removes, 1);
        assert_eq!(host.defaults.sink.as_deref(), Some("speakers"));
    }

    #[test]
    fn test_sink_failure_aborts_start() {
        let mut h = harness(false, false);
        h.sink.host.lock().fail_create = true;

        assert!(matches!(h.controller.toggle(), Err(SessionError::Sink(_))));
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.probe.lock().launches, 0);
    }

    #[test]
    fn test_receive_session_does_not_touch_sink() {
        let mut h = harness(false, false);
        h.controller
            .start(SessionRequest::receive("0.0.0.0:5004".parse().unwrap()))
            .unwrap();
        // status follows the started request, not the toggle target
        assert_eq!(h.controller.status().to_string(), "Listening on 0.0.0.0:5004");
        h.controller.stop().unwrap();

        let host = h.sink.host.lock();
        assert_eq!(host.creates, 0);
        assert_eq!(host.removes, 0);
    }

    #[test]
    fn test_sink_torn_down_exactly_once() {
        let mut h = harness(false, false);
        h.controller.toggle().unwrap();
        h.controller.stop().unwrap();
        h.controller.stop().unwrap();
        h.controller.shutdown();
        drop(h.controller);

        assert_eq!(h.sink.host.lock().removes, 1);
    }

    #[test]
    fn test_crashed_worker_is_wound_down() {
        let mut h = harness(false, false);
        h.controller.toggle().unwrap();
        assert!(!h.controller.poll());

        *h.crashed.lock() = true;
        assert!(h.controller.poll());
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.sink.host.lock().removes, 1);
    }

    #[test]
    fn test_run_loop_collapses_toggles_and_shuts_down() {
        let h = harness(false, false);
        let mut controller = h.controller;
        let (tx, rx) = crossbeam_channel::unbounded();

        // First toggle starts; the three queued behind it collapse into one stop
        for _ in 0..4 {
            tx.send(Command::Toggle).unwrap();
        }
        tx.send(Command::Shutdown).unwrap();
        controller.run(&rx);

        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(h.probe.lock().launches, 1);
        assert_eq!(h.sink.host.lock().removes, 1);
    }

    #[test]
    fn test_enqueue_keeps_one_toggle() {
        let mut pending = VecDeque::new();
        enqueue(&mut pending, Command::Toggle);
        enqueue(&mut pending, Command::Stop);
        enqueue(&mut pending, Command::Toggle);
        assert_eq!(pending, VecDeque::from(vec![Command::Toggle, Command::Stop]));
    }

    #[test]
    fn test_status_text() {
        let peer = peer();
        assert_eq!(SessionStatus::Idle.to_string(), "Idle");
        assert_eq!(
            SessionStatus::Sending { peer, rate: Some(46.875) }.to_string(),
            "Sending: 46.9 packets/s (last 10s)"
        );
        assert_eq!(
            SessionStatus::Listening { local: peer, rate: Some(0.0) }.to_string(),
            "Listening: 0.0 packets/s (last 10s)"
        );
    }
}
