//! Error types for the audio relay

use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio device errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Stream closed")]
    StreamClosed,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Frame codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid frame size: expected {expected} samples, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Socket setup failed: {0}")]
    SocketSetup(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Trigger source errors
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Could not open input device {path}: {reason}")]
    OpenFailed { path: String, reason: String },

    #[error("Could not grab input device {0}")]
    GrabFailed(String),

    #[error("Permission denied reading {0}")]
    PermissionDenied(String),

    #[error("Trigger source disconnected")]
    Disconnected,

    #[error("Trigger input is not supported on this platform")]
    Unsupported,
}

/// Session controller errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A {0} session is already running")]
    AlreadyRunning(String),

    #[error("Controller is busy ({0})")]
    Busy(String),

    #[error("Worker failed to start: {0}")]
    StartFailed(String),

    #[error("Worker did not report ready within {0:?}")]
    StartTimeout(std::time::Duration),

    #[error("Failed to stop worker: {0}")]
    StopFailed(String),

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Sink provisioning failed: {0}")]
    Sink(#[from] SinkError),
}

/// Virtual sink provisioning errors
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("Sink probe failed: {0}")]
    ProbeFailed(String),

    #[error("Sink creation failed for {name}: {reason}")]
    CreateFailed { name: String, reason: String },

    #[error("Could not read default routing: {0}")]
    ReadDefaultsFailed(String),

    #[error("Could not set default {kind} to {target}: {reason}")]
    SetDefaultFailed {
        kind: &'static str,
        target: String,
        reason: String,
    },

    #[error("Sink removal failed: {0}")]
    RemoveFailed(String),
}

/// Result type alias for the relay
pub type Result<T> = std::result::Result<T, Error>;
