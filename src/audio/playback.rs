//! Audio playback to output devices
//!
//! Blocks are queued on a small bounded channel that the device callback
//! drains at the audio clock. The queue depth is the only playback buffer,
//! so latency stays bounded: a writer that finds the queue full waits at
//! most its timeout and then the block is dropped.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::find_output_device;
use crate::audio::{OutputStream, StreamParams, WriteOutcome};
use crate::constants::{DEVICE_OPEN_TIMEOUT, PLAYBACK_QUEUE_BLOCKS};
use crate::error::AudioError;

/// Live output stream on a host device
pub struct PlaybackStream {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    block_tx: Sender<Vec<i16>>,
    error_rx: Receiver<AudioError>,
    underruns: Arc<AtomicU64>,
}

impl PlaybackStream {
    /// Open the device and start the output callback
    pub fn open(params: &StreamParams) -> Result<Self, AudioError> {
        let (block_tx, block_rx) = bounded::<Vec<i16>>(PLAYBACK_QUEUE_BLOCKS);
        let (error_tx, error_rx) = bounded::<AudioError>(4);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let underruns = Arc::new(AtomicU64::new(0));

        let thread_running = running.clone();
        let thread_underruns = underruns.clone();
        let thread_params = params.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let stream = match build_stream(&thread_params, block_rx, thread_underruns, error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                drop(stream);
                tracing::debug!("Playback stream released");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut playback = Self {
            running,
            thread_handle: Some(handle),
            block_tx,
            error_rx,
            underruns,
        };

        match ready_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(playback),
            Ok(Err(e)) => {
                playback.close();
                Err(e)
            }
            Err(_) => {
                playback.close();
                Err(AudioError::StreamError(format!(
                    "output device did not start within {:?}",
                    DEVICE_OPEN_TIMEOUT
                )))
            }
        }
    }

    /// Callbacks that found no queued audio
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            let underruns = self.underruns();
            if underruns > 0 {
                tracing::info!("Output stream closed after {} underruns", underruns);
            }
        }
    }
}

impl OutputStream for PlaybackStream {
    fn write_block(&mut self, samples: &[i16], timeout: Duration) -> Result<WriteOutcome, AudioError> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }

        match self.block_tx.send_timeout(samples.to_vec(), timeout) {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(SendTimeoutError::Timeout(_)) => Ok(WriteOutcome::Dropped),
            Err(SendTimeoutError::Disconnected(_)) => Err(AudioError::StreamClosed),
        }
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Feeds queued blocks into device buffers of arbitrary size
pub struct PlaybackCursor {
    current: Vec<i16>,
    position: usize,
}

impl PlaybackCursor {
    pub fn new() -> Self {
        Self {
            current: Vec::new(),
            position: 0,
        }
    }

    /// Fill `out` from the queue, padding with silence when it runs dry.
    ///
    /// Returns `true` if the queue underran during this fill.
    pub fn fill<T>(&mut self, out: &mut [T], queue: &Receiver<Vec<i16>>) -> bool
    where
        T: Sample + FromSample<i16>,
    {
        let mut written = 0;

        while written < out.len() {
            if self.position >= self.current.len() {
                match queue.try_recv() {
                    Ok(block) => {
                        self.current = block;
                        self.position = 0;
                        continue;
                    }
                    Err(_) => {
                        for slot in &mut out[written..] {
                            *slot = T::EQUILIBRIUM;
                        }
                        return true;
                    }
                }
            }

            let available = self.current.len() - self.position;
            let n = available.min(out.len() - written);
            for (slot, &sample) in out[written..written + n]
                .iter_mut()
                .zip(&self.current[self.position..self.position + n])
            {
                *slot = T::from_sample(sample);
            }
            written += n;
            self.position += n;
        }

        false
    }
}

impl Default for PlaybackCursor {
    fn default() -> Self {
        Self::new()
    }
}

fn build_stream(
    params: &StreamParams,
    block_rx: Receiver<Vec<i16>>,
    underruns: Arc<AtomicU64>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let device = find_output_device(params.device.as_deref())?;
    let (config, format) = device.output_config(params)?;

    tracing::info!(
        "Opening output '{}': {} Hz, {} ch, {:?}",
        device.name,
        config.sample_rate.0,
        config.channels,
        format
    );

    match format {
        SampleFormat::I16 => build_typed::<i16>(device.inner(), &config, block_rx, underruns, error_tx),
        SampleFormat::F32 => build_typed::<f32>(device.inner(), &config, block_rx, underruns, error_tx),
        SampleFormat::U16 => build_typed::<u16>(device.inner(), &config, block_rx, underruns, error_tx),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    block_rx: Receiver<Vec<i16>>,
    underruns: Arc<AtomicU64>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let mut cursor = PlaybackCursor::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                if cursor.fill(data, &block_rx) {
                    underruns.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    let _ = error_tx.try_send(AudioError::DeviceNotFound("output device disappeared".to_string()));
                }
                other => tracing::warn!("Output stream error: {}", other),
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}
