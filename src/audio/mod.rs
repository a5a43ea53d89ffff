//! Audio subsystem module
//!
//! Pipelines talk to devices through the [`InputStream`] and
//! [`OutputStream`] traits. [`CpalBackend`] opens real host devices;
//! [`tone::ToneBackend`] feeds a synthetic test signal.

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;
pub mod tone;

use std::time::Duration;

use crate::config::AudioConfig;
use crate::error::AudioError;

pub use buffer::{AudioFrame, BlockAssembler};
pub use capture::CaptureStream;
pub use playback::PlaybackStream;
pub use tone::{ToneBackend, ToneSource};

/// Fixed stream parameters; never negotiated with the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames_per_chunk: usize,
    /// Device name; `None` selects the host default
    pub device: Option<String>,
}

impl StreamParams {
    pub fn input(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frames_per_chunk: config.frames_per_chunk,
            device: config.input_device.clone(),
        }
    }

    pub fn output(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            frames_per_chunk: config.frames_per_chunk,
            device: config.output_device.clone(),
        }
    }

    /// Interleaved samples per block
    pub fn block_len(&self) -> usize {
        self.frames_per_chunk * self.channels as usize
    }
}

/// One block read from an input device
#[derive(Debug, Clone)]
pub struct CapturedBlock {
    pub samples: Vec<i16>,
    /// Device dropped input since the previous block
    pub overflowed: bool,
}

/// Outcome of handing a block to an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The device buffer stayed full for the whole write timeout
    Dropped,
}

/// Blocking, block-oriented audio input
pub trait InputStream {
    /// Wait up to `timeout` for the next full block; `Ok(None)` on timeout.
    fn read_block(&mut self, timeout: Duration) -> Result<Option<CapturedBlock>, AudioError>;
}

/// Block-oriented audio output with bounded buffering
pub trait OutputStream {
    /// Queue one block, blocking at most `timeout` while the device buffer is full.
    fn write_block(&mut self, samples: &[i16], timeout: Duration) -> Result<WriteOutcome, AudioError>;
}

/// Opens device streams for a session
///
/// Streams are opened on the worker thread that uses them and are released
/// when dropped.
pub trait AudioBackend: Send + Sync {
    fn open_input(&self, params: &StreamParams) -> Result<Box<dyn InputStream>, AudioError>;
    fn open_output(&self, params: &StreamParams) -> Result<Box<dyn OutputStream>, AudioError>;
}

/// Host audio through cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalBackend;

impl AudioBackend for CpalBackend {
    fn open_input(&self, params: &StreamParams) -> Result<Box<dyn InputStream>, AudioError> {
        Ok(Box::new(CaptureStream::open(params)?))
    }

    fn open_output(&self, params: &StreamParams) -> Result<Box<dyn OutputStream>, AudioError> {
        Ok(Box::new(PlaybackStream::open(params)?))
    }
}
