//! # vox-relay
//!
//! Real-time PCM audio relay between two hosts over UDP, toggled by a
//! hardware key.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             SENDING HOST                             │
//! │  ┌──────────────┐   ┌────────────────┐   ┌────────────────────────┐  │
//! │  │ evdev key    │──▶│ Trigger        │──▶│ Session Controller     │  │
//! │  │ (trigger)    │   │ Debouncer      │   │ (session::controller)  │  │
//! │  └──────────────┘   └────────────────┘   └───────────┬────────────┘  │
//! │                                             ┌────────┴────────┐      │
//! │                                             ▼                 ▼      │
//! │                                   ┌──────────────┐  ┌──────────────┐ │
//! │                                   │ Sink         │  │ Worker       │ │
//! │                                   │ Lifecycle    │  │ thread|proc  │ │
//! │                                   └──────────────┘  └──────┬───────┘ │
//! │  ┌──────────────┐   ┌────────────────┐   ┌─────────────────┴──────┐  │
//! │  │ Input device │──▶│ Frame Codec    │──▶│ Capture Pipeline       │  │
//! │  │ (cpal)       │   │ (i16 PCM)      │   │ + metrics window       │  │
//! │  └──────────────┘   └────────────────┘   └───────────┬────────────┘  │
//! └──────────────────────────────────────────────────────┼───────────────┘
//!                                                        │ UDP, one block
//!                                                        ▼ per datagram
//! ┌──────────────────────────────────────────────────────┼───────────────┐
//! │                            RECEIVING HOST            │               │
//! │  ┌──────────────┐   ┌────────────────┐   ┌───────────┴────────────┐  │
//! │  │ Output device│◀──│ Frame Codec    │◀──│ Playback Pipeline      │  │
//! │  │ (cpal)       │   │ (validate len) │   │ 1 s receive timeout    │  │
//! │  └──────────────┘   └────────────────┘   └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Datagrams carry raw native-endian signed 16-bit interleaved PCM, exactly
//! one block each, with no header. Anything of the wrong length is dropped.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod metrics;
pub mod network;
pub mod pipeline;
pub mod session;
pub mod signal;
pub mod sink;
pub mod trigger;

pub use error::{Error, Result};

/// Application-wide constants
///
/// These seed [`config::AppConfig`] defaults; components read their
/// settings from the config they are constructed with.
pub mod constants {
    use std::time::Duration;

    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Frames per channel in one block / datagram
    pub const DEFAULT_FRAMES_PER_CHUNK: usize = 1024;

    /// Default UDP port for audio streaming
    pub const DEFAULT_UDP_PORT: u16 = 5004;

    pub const DEFAULT_TRIGGER_DEVICE: &str = "/dev/input/event5";

    /// KEY_REWIND
    pub const DEFAULT_TRIGGER_KEY_CODE: u16 = 168;

    pub const DEFAULT_COOLDOWN_MS: u64 = 2000;

    pub const DEFAULT_GRACE_PERIOD_MS: u64 = 2000;

    pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 1000;

    pub const DEFAULT_START_TIMEOUT_MS: u64 = 5000;

    /// Virtual sink created for send sessions
    pub const DEFAULT_SINK_NAME: &str = "vox_meter";

    /// Seconds of per-second packet counts in the rolling average
    pub const METRICS_WINDOW_SECONDS: usize = 10;

    /// Device callback chunks buffered between the capture callback and the pipeline
    pub const CAPTURE_QUEUE_CHUNKS: usize = 64;

    /// Blocks buffered ahead of the output device
    pub const PLAYBACK_QUEUE_BLOCKS: usize = 4;

    /// How long a device may take to open its stream
    pub const DEVICE_OPEN_TIMEOUT: Duration = Duration::from_secs(3);

    /// A child worker that survives this long is considered started
    pub const PROCESS_STARTUP_PROBE: Duration = Duration::from_millis(300);

    /// Controller wake-up interval for noticing crashed workers
    pub const CONTROLLER_POLL_INTERVAL: Duration = Duration::from_millis(100);

    /// Back-to-back receive errors after which the socket is treated as dead
    pub const MAX_CONSECUTIVE_RECEIVE_ERRORS: u32 = 100;

    /// Pause after a failed receive
    pub const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_millis(10);
}
