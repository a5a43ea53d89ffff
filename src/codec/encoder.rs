//! PCM block encoder
//!
//! Serializes one interleaved i16 block into its fixed-size wire form.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::FrameLayout;
use crate::error::CodecError;

/// Block encoder with a fixed layout
pub struct FrameEncoder {
    layout: FrameLayout,
    /// Frame counter for statistics
    frames_encoded: u64,
    /// Total bytes produced
    bytes_produced: u64,
}

impl FrameEncoder {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            frames_encoded: 0,
            bytes_produced: 0,
        }
    }

    /// Encode interleaved samples to wire bytes
    ///
    /// Input length must equal `frames_per_chunk * channels`.
    pub fn encode(&mut self, samples: &[i16]) -> Result<Bytes, CodecError> {
        let expected = self.layout.samples_per_block();
        if samples.len() != expected {
            return Err(CodecError::InvalidFrameSize {
                expected,
                actual: samples.len(),
            });
        }

        let mut buf = BytesMut::with_capacity(self.layout.packet_size());
        for sample in samples {
            buf.put_slice(&sample.to_ne_bytes());
        }

        self.frames_encoded += 1;
        self.bytes_produced += buf.len() as u64;

        Ok(buf.freeze())
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// Get statistics
    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_is_native_endian_interleaved() {
        let mut encoder = FrameEncoder::new(FrameLayout::new(2, 2));
        let encoded = encoder.encode(&[1, -1, 256, i16::MIN]).unwrap();

        let mut expected = Vec::new();
        for s in [1i16, -1, 256, i16::MIN] {
            expected.extend_from_slice(&s.to_ne_bytes());
        }
        assert_eq!(&encoded[..], &expected[..]);
    }

    #[test]
    fn test_wrong_length_input() {
        let mut encoder = FrameEncoder::new(FrameLayout::new(2, 4));
        let err = encoder.encode(&[0; 7]).unwrap_err();
        assert_eq!(
            err,
            CodecError::InvalidFrameSize {
                expected: 8,
                actual: 7
            }
        );
        assert_eq!(encoder.stats().frames_encoded, 0);
    }

    #[test]
    fn test_stats() {
        let mut encoder = FrameEncoder::new(FrameLayout::new(1, 8));
        encoder.encode(&[0; 8]).unwrap();
        encoder.encode(&[0; 8]).unwrap();

        let stats = encoder.stats();
        assert_eq!(stats.frames_encoded, 2);
        assert_eq!(stats.bytes_produced, 32);
    }
}
