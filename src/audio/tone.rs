//! Synthetic test signal
//!
//! Short 440 Hz bursts over silence, paced at the real audio clock. Useful for
//! checking a link end to end without a microphone or monitor source.

use std::f64::consts::TAU;
use std::time::{Duration, Instant};

use crate::audio::{AudioBackend, CapturedBlock, CpalBackend, InputStream, OutputStream, StreamParams};
use crate::error::AudioError;

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 0.25;
/// A burst starts every this many blocks (about once a second at defaults)
const BURST_PERIOD_BLOCKS: u64 = 50;
/// Burst length in blocks
const BURST_LENGTH_BLOCKS: u64 = 5;

/// Test-tone input stream
pub struct ToneSource {
    params: StreamParams,
    phase: f64,
    omega: f64,
    blocks: u64,
    block_duration: Duration,
    next_due: Option<Instant>,
    paced: bool,
}

impl ToneSource {
    pub fn new(params: &StreamParams) -> Self {
        Self {
            params: params.clone(),
            phase: 0.0,
            omega: TAU * TONE_HZ / params.sample_rate as f64,
            blocks: 0,
            block_duration: Duration::from_secs_f64(params.frames_per_chunk as f64 / params.sample_rate as f64),
            next_due: None,
            paced: true,
        }
    }

    /// Produce blocks as fast as they are read
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    fn next_block(&mut self) -> Vec<i16> {
        let channels = self.params.channels as usize;
        let mut samples = Vec::with_capacity(self.params.block_len());
        let in_burst = self.blocks % BURST_PERIOD_BLOCKS < BURST_LENGTH_BLOCKS;

        for _ in 0..self.params.frames_per_chunk {
            let value = if in_burst {
                let v = (TONE_AMPLITUDE * self.phase.sin() * 32767.0).clamp(-32768.0, 32767.0) as i16;
                self.phase = (self.phase + self.omega) % TAU;
                v
            } else {
                0
            };
            samples.extend(std::iter::repeat(value).take(channels));
        }

        self.blocks += 1;
        samples
    }
}

impl InputStream for ToneSource {
    fn read_block(&mut self, timeout: Duration) -> Result<Option<CapturedBlock>, AudioError> {
        if self.paced {
            let now = Instant::now();
            let due = *self.next_due.get_or_insert(now);
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    std::thread::sleep(timeout);
                    return Ok(None);
                }
                std::thread::sleep(wait);
            }
            self.next_due = Some(due + self.block_duration);
        }

        Ok(Some(CapturedBlock {
            samples: self.next_block(),
            overflowed: false,
        }))
    }
}

/// Backend whose input is the test tone; output goes to the host device
#[derive(Debug, Clone, Copy, Default)]
pub struct ToneBackend;

impl AudioBackend for ToneBackend {
    fn open_input(&self, params: &StreamParams) -> Result<Box<dyn InputStream>, AudioError> {
        tracing::info!("Using {} Hz test tone as input", TONE_HZ);
        Ok(Box::new(ToneSource::new(params)))
    }

    fn open_output(&self, params: &StreamParams) -> Result<Box<dyn OutputStream>, AudioError> {
        CpalBackend.open_output(params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::rms_level;

    fn params() -> StreamParams {
        StreamParams {
            sample_rate: 48000,
            channels: 2,
            frames_per_chunk: 1024,
            device: None,
        }
    }

    #[test]
    fn test_burst_then_silence() {
        let mut tone = ToneSource::new(&params()).unpaced();

        for i in 0..BURST_PERIOD_BLOCKS {
            let block = tone.read_block(Duration::from_secs(1)).unwrap().unwrap();
            assert_eq!(block.samples.len(), 2048);
            let level = rms_level(&block.samples);
            if i < BURST_LENGTH_BLOCKS {
                // sine at 0.25 amplitude has RMS 0.25 / sqrt(2)
                assert!((level - 0.1768).abs() < 0.01, "block {} level {}", i, level);
            } else {
                assert_eq!(level, 0.0);
            }
        }
    }

    #[test]
    fn test_channels_are_identical() {
        let mut tone = ToneSource::new(&params()).unpaced();
        let block = tone.read_block(Duration::from_secs(1)).unwrap().unwrap();
        for pair in block.samples.chunks_exact(2) {
            assert_eq!(pair[0], pair[1]);
        }
    }

    #[test]
    fn test_pacing_respects_timeout() {
        let mut tone = ToneSource::new(&params());
        assert!(tone.read_block(Duration::from_millis(5)).unwrap().is_some());

        // next block is due ~21ms later
        let start = Instant::now();
        assert!(tone.read_block(Duration::from_millis(5)).unwrap().is_none());
        assert!(start.elapsed() < Duration::from_millis(20));
    }
}
