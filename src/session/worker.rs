//! Session workers
//!
//! A [`Worker`] is one running pipeline, either on an in-process thread
//! ([`ThreadWorker`]) or in a child `vox-send` / `vox-listen` process
//! ([`ProcessWorker`]). The controller only uses the trait: signal stop,
//! wait with a bound, force-kill.

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::AudioBackend;
use crate::config::AppConfig;
use crate::constants::PROCESS_STARTUP_PROBE;
use crate::error::{Result as RelayResult, SessionError};
use crate::metrics::PipelineStats;
use crate::network::Endpoint;
use crate::pipeline::{CapturePipeline, Direction, PlaybackPipeline};
use crate::signal::StopSignal;

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Completed,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited(WorkerExit),
    TimedOut,
}

/// A running session backend
pub trait Worker: Send {
    /// Ask the worker to stop; returns immediately
    fn signal_stop(&mut self);

    /// Whether the worker has ended (on its own or after a stop)
    fn is_finished(&mut self) -> bool;

    /// Wait up to `timeout` for the worker to end
    fn wait(&mut self, timeout: Duration) -> WaitOutcome;

    /// Terminate without waiting for cooperation
    fn force_kill(&mut self) -> Result<(), SessionError>;

    /// Live counters, when the worker shares them with this process
    fn stats(&self) -> Option<Arc<PipelineStats>>;
}

/// Pipeline running on a dedicated thread
pub struct ThreadWorker {
    name: String,
    stop: StopSignal,
    done: Receiver<WorkerExit>,
    handle: Option<JoinHandle<()>>,
    exit: Option<WorkerExit>,
    stats: Arc<PipelineStats>,
}

impl ThreadWorker {
    /// Open a pipeline on a new thread and run it there
    ///
    /// Returns once `open` has succeeded on the worker thread. An `open`
    /// failure or a start taking longer than `start_timeout` is returned as
    /// a start error and the thread is told to stop.
    pub fn spawn<P, O, R>(
        name: &str,
        start_timeout: Duration,
        stats: Arc<PipelineStats>,
        open: O,
        run: R,
    ) -> Result<Self, SessionError>
    where
        O: FnOnce() -> RelayResult<P> + Send + 'static,
        R: FnOnce(P, &StopSignal) -> RelayResult<()> + Send + 'static,
    {
        let stop = StopSignal::new();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<std::result::Result<(), String>>(1);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        let thread_stop = stop.clone();
        let thread_name = name.to_string();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let pipeline = match open() {
                    Ok(pipeline) => {
                        let _ = ready_tx.send(Ok(()));
                        pipeline
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.to_string()));
                        return;
                    }
                };

                let exit = match run(pipeline, &thread_stop) {
                    Ok(()) => WorkerExit::Completed,
                    Err(e) => {
                        tracing::error!("{} failed: {}", thread_name, e);
                        WorkerExit::Failed(e.to_string())
                    }
                };
                let _ = done_tx.send(exit);
            })
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        match ready_rx.recv_timeout(start_timeout) {
            Ok(Ok(())) => Ok(Self {
                name: name.to_string(),
                stop,
                done: done_rx,
                handle: Some(handle),
                exit: None,
                stats,
            }),
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(SessionError::StartFailed(reason))
            }
            Err(RecvTimeoutError::Timeout) => {
                stop.stop();
                tracing::warn!("{} did not open within {:?}, abandoning it", name, start_timeout);
                Err(SessionError::StartTimeout(start_timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                Err(SessionError::StartFailed(format!("{} exited during startup", name)))
            }
        }
    }

    fn finish(&mut self, exit: WorkerExit) -> WorkerExit {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.exit = Some(exit.clone());
        exit
    }

    fn panicked(&self) -> WorkerExit {
        WorkerExit::Failed(format!("{} panicked", self.name))
    }
}

impl Worker for ThreadWorker {
    fn signal_stop(&mut self) {
        self.stop.stop();
    }

    fn is_finished(&mut self) -> bool {
        if self.exit.is_some() {
            return true;
        }
        match self.done.try_recv() {
            Ok(exit) => {
                self.finish(exit);
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                let exit = self.panicked();
                self.finish(exit);
                true
            }
        }
    }

    fn wait(&mut self, timeout: Duration) -> WaitOutcome {
        if let Some(exit) = &self.exit {
            return WaitOutcome::Exited(exit.clone());
        }
        match self.done.recv_timeout(timeout) {
            Ok(exit) => WaitOutcome::Exited(self.finish(exit)),
            Err(RecvTimeoutError::Timeout) => WaitOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => {
                let exit = self.panicked();
                WaitOutcome::Exited(self.finish(exit))
            }
        }
    }

    fn force_kill(&mut self) -> Result<(), SessionError> {
        // Threads cannot be killed; detach it with the stop flag cleared so
        // it exits as soon as its blocking call returns.
        self.stop.stop();
        if self.handle.take().is_some() {
            tracing::warn!("{} did not stop in time, detaching it", self.name);
        }
        self.exit = Some(WorkerExit::Failed("forcibly terminated".to_string()));
        Ok(())
    }

    fn stats(&self) -> Option<Arc<PipelineStats>> {
        Some(self.stats.clone())
    }
}

impl Drop for ThreadWorker {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

/// Pipeline running in a child process
pub struct ProcessWorker {
    child: Child,
    label: String,
    exit: Option<WorkerExit>,
}

impl ProcessWorker {
    /// Spawn `command` and make sure it survives a short startup probe
    pub fn spawn(mut command: Command, probe: Duration) -> Result<Self, SessionError> {
        let label = command.get_program().to_string_lossy().into_owned();
        let child = command
            .spawn()
            .map_err(|e| SessionError::SpawnFailed(format!("{}: {}", label, e)))?;
        tracing::info!("Started {} (pid {})", label, child.id());

        let mut worker = Self {
            child,
            label,
            exit: None,
        };

        if let WaitOutcome::Exited(exit) = worker.wait(probe) {
            let reason = match exit {
                WorkerExit::Completed => "exited immediately".to_string(),
                WorkerExit::Failed(reason) => reason,
            };
            return Err(SessionError::StartFailed(format!("{} {}", worker.label, reason)));
        }
        Ok(worker)
    }

    fn poll(&mut self) -> Option<WorkerExit> {
        if self.exit.is_some() {
            return self.exit.clone();
        }
        let exit = match self.child.try_wait() {
            Ok(Some(status)) if status.success() => WorkerExit::Completed,
            Ok(Some(status)) => WorkerExit::Failed(format!("exited with {}", status)),
            Ok(None) => return None,
            Err(e) => WorkerExit::Failed(e.to_string()),
        };
        self.exit = Some(exit.clone());
        Some(exit)
    }
}

impl Worker for ProcessWorker {
    fn signal_stop(&mut self) {
        if self.poll().is_some() {
            return;
        }
        #[cfg(unix)]
        {
            // SIGINT lets the child run its own cleanup
            let pid = self.child.id() as libc::pid_t;
            if unsafe { libc::kill(pid, libc::SIGINT) } != 0 {
                tracing::warn!("Could not signal {}: {}", self.label, std::io::Error::last_os_error());
            }
        }
        #[cfg(not(unix))]
        {
            let _ = self.child.kill();
        }
    }

    fn is_finished(&mut self) -> bool {
        self.poll().is_some()
    }

    fn wait(&mut self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(exit) = self.poll() {
                return WaitOutcome::Exited(exit);
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(20)));
        }
    }

    fn force_kill(&mut self) -> Result<(), SessionError> {
        if self.poll().is_some() {
            return Ok(());
        }
        tracing::warn!("Killing {} (pid {})", self.label, self.child.id());
        self.child
            .kill()
            .map_err(|e| SessionError::StopFailed(format!("{}: {}", self.label, e)))?;
        let status = self
            .child
            .wait()
            .map_err(|e| SessionError::StopFailed(format!("{}: {}", self.label, e)))?;
        self.exit = Some(WorkerExit::Failed(format!("killed ({})", status)));
        Ok(())
    }

    fn stats(&self) -> Option<Arc<PipelineStats>> {
        None
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        if self.poll().is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// What a session should do
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub direction: Direction,
    /// Peer for send sessions, local bind address for receive sessions
    pub endpoint: Endpoint,
}

impl SessionRequest {
    pub fn send(peer: Endpoint) -> Self {
        Self {
            direction: Direction::Send,
            endpoint: peer,
        }
    }

    pub fn receive(listen: Endpoint) -> Self {
        Self {
            direction: Direction::Receive,
            endpoint: listen,
        }
    }
}

/// Starts workers for the controller
pub trait WorkerLauncher: Send {
    fn launch(&self, request: &SessionRequest) -> Result<Box<dyn Worker>, SessionError>;
}

/// Runs pipelines on in-process threads
pub struct ThreadLauncher {
    config: Arc<AppConfig>,
    backend: Arc<dyn AudioBackend>,
}

impl ThreadLauncher {
    pub fn new(config: Arc<AppConfig>, backend: Arc<dyn AudioBackend>) -> Self {
        Self { config, backend }
    }
}

impl WorkerLauncher for ThreadLauncher {
    fn launch(&self, request: &SessionRequest) -> Result<Box<dyn Worker>, SessionError> {
        let config = self.config.clone();
        let backend = self.backend.clone();
        let stats = PipelineStats::new();
        let pipeline_stats = stats.clone();
        let start_timeout = config.session.start_timeout();
        let endpoint = request.endpoint;

        let worker = match request.direction {
            Direction::Send => ThreadWorker::spawn(
                "vox-send",
                start_timeout,
                stats,
                move || CapturePipeline::open(&config, endpoint, backend.as_ref(), pipeline_stats),
                |pipeline, stop| pipeline.run(stop),
            )?,
            Direction::Receive => ThreadWorker::spawn(
                "vox-listen",
                start_timeout,
                stats,
                move || {
                    let listen = SocketAddr::new(endpoint.ip(), endpoint.port());
                    PlaybackPipeline::open(&config, listen, backend.as_ref(), pipeline_stats)
                },
                |pipeline, stop| pipeline.run(stop),
            )?,
        };
        Ok(Box::new(worker))
    }
}

/// Runs pipelines as child `vox-send` / `vox-listen` processes
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    bin_dir: PathBuf,
    config_path: Option<PathBuf>,
    verbose: bool,
}

impl ProcessLauncher {
    /// Children are looked up next to the running executable
    pub fn new(config_path: Option<PathBuf>, verbose: bool) -> Result<Self, SessionError> {
        let exe = std::env::current_exe().map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        let bin_dir = exe
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| SessionError::SpawnFailed(format!("{} has no parent directory", exe.display())))?;
        Ok(Self::with_bin_dir(bin_dir, config_path, verbose))
    }

    pub fn with_bin_dir(bin_dir: PathBuf, config_path: Option<PathBuf>, verbose: bool) -> Self {
        Self {
            bin_dir,
            config_path,
            verbose,
        }
    }

    fn command(&self, request: &SessionRequest) -> Command {
        let (program, ip_flag) = match request.direction {
            Direction::Send => ("vox-send", "--ip"),
            Direction::Receive => ("vox-listen", "--listen-ip"),
        };

        let mut command = Command::new(self.bin_dir.join(program));
        command
            .arg(ip_flag)
            .arg(request.endpoint.ip().to_string())
            .arg("--port")
            .arg(request.endpoint.port().to_string());
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }
        if self.verbose {
            command.arg("--verbose");
        }
        command
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, request: &SessionRequest) -> Result<Box<dyn Worker>, SessionError> {
        Ok(Box::new(ProcessWorker::spawn(self.command(request), PROCESS_STARTUP_PROBE)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AudioError, Error};

    fn idle_until_stopped(_: (), stop: &StopSignal) -> RelayResult<()> {
        while stop.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    #[test]
    fn test_thread_worker_stops_cooperatively() {
        let mut worker = ThreadWorker::spawn(
            "test-worker",
            Duration::from_secs(1),
            PipelineStats::new(),
            || Ok(()),
            idle_until_stopped,
        )
        .unwrap();

        assert!(!worker.is_finished());
        worker.signal_stop();
        assert_eq!(
            worker.wait(Duration::from_secs(1)),
            WaitOutcome::Exited(WorkerExit::Completed)
        );
        assert!(worker.is_finished());
    }

    #[test]
    fn test_thread_worker_open_failure_is_start_failure() {
        let result = ThreadWorker::spawn(
            "test-worker",
            Duration::from_secs(1),
            PipelineStats::new(),
            || -> RelayResult<()> { Err(Error::Audio(AudioError::DeviceNotFound("hw:9".into()))) },
            idle_until_stopped,
        );
        match result {
            Err(SessionError::StartFailed(reason)) => assert!(reason.contains("hw:9")),
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_thread_worker_slow_open_times_out() {
        let result = ThreadWorker::spawn(
            "test-worker",
            Duration::from_millis(20),
            PipelineStats::new(),
            || {
                thread::sleep(Duration::from_millis(200));
                Ok(())
            },
            idle_until_stopped,
        );
        assert!(matches!(result, Err(SessionError::StartTimeout(_))));
    }

    #[test]
    fn test_thread_worker_run_failure_is_reported() {
        let mut worker = ThreadWorker::spawn(
            "test-worker",
            Duration::from_secs(1),
            PipelineStats::new(),
            || Ok(()),
            |_, _| Err(Error::Audio(AudioError::StreamClosed)),
        )
        .unwrap();

        match worker.wait(Duration::from_secs(1)) {
            WaitOutcome::Exited(WorkerExit::Failed(reason)) => assert!(reason.contains("closed")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_stuck_thread_worker_is_detached() {
        let mut worker = ThreadWorker::spawn(
            "stuck-worker",
            Duration::from_secs(1),
            PipelineStats::new(),
            || Ok(()),
            |_, _| {
                thread::sleep(Duration::from_millis(500));
                Ok(())
            },
        )
        .unwrap();

        worker.signal_stop();
        assert_eq!(worker.wait(Duration::from_millis(20)), WaitOutcome::TimedOut);
        worker.force_kill().unwrap();
        assert!(worker.is_finished());
    }

    #[test]
    fn test_process_command_line() {
        let launcher = ProcessLauncher::with_bin_dir(PathBuf::from("/opt/vox/bin"), None, true);
        let request = SessionRequest::send("192.168.1.20:6000".parse().unwrap());
        let command = launcher.command(&request);

        assert_eq!(command.get_program(), "/opt/vox/bin/vox-send");
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["--ip", "192.168.1.20", "--port", "6000", "--verbose"]);
    }

    #[test]
    fn test_missing_child_binary_is_spawn_failure() {
        let launcher = ProcessLauncher::with_bin_dir(PathBuf::from("/nonexistent"), None, false);
        let request = SessionRequest::receive("0.0.0.0:5004".parse().unwrap());
        assert!(matches!(launcher.launch(&request), Err(SessionError::SpawnFailed(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_worker_sigint_and_kill() {
        // sleep dies on SIGINT
        let mut command = Command::new("sleep");
        command.arg("30");
        let mut worker = ProcessWorker::spawn(command, Duration::from_millis(50)).unwrap();
        worker.signal_stop();
        assert!(matches!(worker.wait(Duration::from_secs(2)), WaitOutcome::Exited(_)));

        // a shell ignoring SIGINT needs the kill
        let mut command = Command::new("sh");
        command.arg("-c").arg("trap '' INT; sleep 30");
        let mut worker = ProcessWorker::spawn(command, Duration::from_millis(50)).unwrap();
        worker.signal_stop();
        assert_eq!(worker.wait(Duration::from_millis(100)), WaitOutcome::TimedOut);
        worker.force_kill().unwrap();
        assert!(worker.is_finished());
    }

    #[cfg(unix)]
    #[test]
    fn test_process_that_exits_during_probe_fails_to_start() {
        let command = Command::new("false");
        assert!(matches!(
            ProcessWorker::spawn(command, Duration::from_millis(300)),
            Err(SessionError::StartFailed(_))
        ));
    }
}
