//! Audio frames and block assembly
//!
//! Device callbacks deliver buffers of whatever size the host chooses. The
//! relay works in fixed blocks, so the capture side re-chunks callback data
//! with a [`BlockAssembler`] before encoding.

/// One block of interleaved i16 samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
    channels: u16,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, channels: u16) -> Self {
        Self { samples, channels }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Get number of samples per channel
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// RMS level normalized to full scale (0.0 - 1.0)
    pub fn rms(&self) -> f32 {
        rms_level(&self.samples)
    }
}

/// RMS of i16 samples normalized to full scale
pub fn rms_level(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64;
            v * v
        })
        .sum();
    ((sum_sq / samples.len() as f64).sqrt() / 32768.0) as f32
}

/// Re-chunks arbitrary-length sample runs into fixed-size blocks
pub struct BlockAssembler {
    block_len: usize,
    pending: Vec<i16>,
}

impl BlockAssembler {
    /// `block_len` is in interleaved samples
    pub fn new(block_len: usize) -> Self {
        Self {
            block_len,
            pending: Vec::with_capacity(block_len * 2),
        }
    }

    pub fn push(&mut self, samples: &[i16]) {
        self.pending.extend_from_slice(samples);
    }

    /// Take the next complete block, if one is buffered
    pub fn pop_block(&mut self) -> Option<Vec<i16>> {
        if self.pending.len() < self.block_len {
            return None;
        }
        let rest = self.pending.split_off(self.block_len);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_shape() {
        let frame = AudioFrame::new(vec![0; 960], 2);
        assert_eq!(frame.samples().len(), 960);
        assert_eq!(frame.frames(), 480);
        assert_eq!(frame.rms(), 0.0);
    }

    #[test]
    fn test_rms_full_scale_square() {
        let samples = [i16::MIN, i16::MIN, i16::MIN, i16::MIN];
        assert!((rms_level(&samples) - 1.0).abs() < 1e-6);

        let half = [16384i16, -16384, 16384, -16384];
        assert!((rms_level(&half) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_assembler_rechunks() {
        let mut assembler = BlockAssembler::new(4);

        assembler.push(&[1, 2, 3]);
        assert!(assembler.pop_block().is_none());

        assembler.push(&[4, 5, 6, 7, 8, 9]);
        assert_eq!(assembler.pop_block(), Some(vec![1, 2, 3, 4]));
        assert_eq!(assembler.pop_block(), Some(vec![5, 6, 7, 8]));
        assert!(assembler.pop_block().is_none());
        assert_eq!(assembler.pending_len(), 1);
    }
}
