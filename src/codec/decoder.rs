//! PCM block decoder
//!
//! Validates datagrams against the fixed layout. Anything of the wrong
//! length is rejected whole; nothing is partially interpreted.

use crate::audio::buffer::AudioFrame;
use crate::codec::{FrameLayout, BYTES_PER_SAMPLE};

/// A datagram that did not match the block layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub expected: usize,
    pub actual: usize,
}

/// Block decoder with a fixed layout
pub struct FrameDecoder {
    layout: FrameLayout,
    frames_decoded: u64,
    frames_rejected: u64,
}

impl FrameDecoder {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            frames_decoded: 0,
            frames_rejected: 0,
        }
    }

    /// Decode one datagram payload into an audio frame
    pub fn decode(&mut self, data: &[u8]) -> Result<AudioFrame, Rejected> {
        let expected = self.layout.packet_size();
        if data.len() != expected {
            self.frames_rejected += 1;
            return Err(Rejected {
                expected,
                actual: data.len(),
            });
        }

        let samples = data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
            .collect();

        self.frames_decoded += 1;
        Ok(AudioFrame::new(samples, self.layout.channels()))
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_rejected: self.frames_rejected,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_rejected: u64,
}
