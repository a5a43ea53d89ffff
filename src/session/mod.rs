//! Relay session control
//!
//! [`SessionController`] owns the session lifecycle; [`worker`] provides the
//! thread and child-process backends it drives.

pub mod controller;
pub mod worker;

pub use controller::{Command, SessionController, SessionState, SessionStatus};
pub use worker::{
    ProcessLauncher, ProcessWorker, SessionRequest, ThreadLauncher, ThreadWorker, WaitOutcome, Worker, WorkerExit,
    WorkerLauncher,
};
