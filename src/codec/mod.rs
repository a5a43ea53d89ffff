//! Raw PCM frame codec
//!
//! The wire format is one audio block per datagram: native-endian signed
//! 16-bit samples, channel-interleaved, with no header. A datagram is valid
//! only if its length is exactly `frames_per_chunk * channels * 2`.

pub mod decoder;
pub mod encoder;

pub use decoder::{FrameDecoder, Rejected};
pub use encoder::FrameEncoder;

/// Bytes per encoded sample (i16)
pub const BYTES_PER_SAMPLE: usize = 2;

/// Fixed shape of one audio block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    channels: u16,
    frames_per_chunk: usize,
}

impl FrameLayout {
    pub fn new(channels: u16, frames_per_chunk: usize) -> Self {
        Self {
            channels,
            frames_per_chunk,
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames_per_chunk(&self) -> usize {
        self.frames_per_chunk
    }

    /// Interleaved samples in one block (all channels)
    pub fn samples_per_block(&self) -> usize {
        self.frames_per_chunk * self.channels as usize
    }

    /// Exact on-wire size of one block
    pub fn packet_size(&self) -> usize {
        self.samples_per_block() * BYTES_PER_SAMPLE
    }
}
