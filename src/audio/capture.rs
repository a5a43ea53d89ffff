//! Audio capture from input devices
//!
//! The cpal stream lives on a dedicated thread for its whole lifetime (cpal
//! streams are not `Send` on every host). The device callback forwards
//! sample runs over a bounded channel; [`CaptureStream::read_block`]
//! re-chunks them into fixed blocks. A full channel means the reader fell
//! behind: the run is dropped and the next block is flagged as overflowed.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::BlockAssembler;
use crate::audio::device::find_input_device;
use crate::audio::{CapturedBlock, InputStream, StreamParams};
use crate::constants::{CAPTURE_QUEUE_CHUNKS, DEVICE_OPEN_TIMEOUT};
use crate::error::AudioError;

/// Live input stream on a host device
pub struct CaptureStream {
    /// Whether the stream thread should keep the device open
    running: Arc<AtomicBool>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,

    /// Sample runs from the device callback
    chunk_rx: Receiver<Vec<i16>>,

    /// Fatal stream errors
    error_rx: Receiver<AudioError>,

    /// Set by the callback when a run had to be dropped
    overflow: Arc<AtomicBool>,

    assembler: BlockAssembler,
}

impl CaptureStream {
    /// Open the device and start capturing
    ///
    /// Returns once the stream is playing, or with the cause if the device
    /// could not be opened.
    pub fn open(params: &StreamParams) -> Result<Self, AudioError> {
        let (chunk_tx, chunk_rx) = bounded::<Vec<i16>>(CAPTURE_QUEUE_CHUNKS);
        let (error_tx, error_rx) = bounded::<AudioError>(4);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let running = Arc::new(AtomicBool::new(true));
        let overflow = Arc::new(AtomicBool::new(false));

        let thread_running = running.clone();
        let thread_overflow = overflow.clone();
        let thread_params = params.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match build_stream(&thread_params, thread_running.clone(), chunk_tx, thread_overflow, error_tx) {
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

                // Keep thread alive while running
                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, releasing the device
                drop(stream);
                tracing::debug!("Capture stream released");
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut capture = Self {
            running,
            thread_handle: Some(handle),
            chunk_rx,
            error_rx,
            overflow,
            assembler: BlockAssembler::new(params.block_len()),
        };

        match ready_rx.recv_timeout(DEVICE_OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(capture),
            Ok(Err(e)) => {
                capture.close();
                Err(e)
            }
            Err(_) => {
                capture.close();
                Err(AudioError::StreamError(format!(
                    "input device did not start within {:?}",
                    DEVICE_OPEN_TIMEOUT
                )))
            }
        }
    }

    /// Stop the stream thread and release the device
    pub fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl InputStream for CaptureStream {
    fn read_block(&mut self, timeout: Duration) -> Result<Option<CapturedBlock>, AudioError> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Ok(err) = self.error_rx.try_recv() {
                return Err(err);
            }

            if let Some(samples) = self.assembler.pop_block() {
                return Ok(Some(CapturedBlock {
                    samples,
                    overflowed: self.overflow.swap(false, Ordering::Relaxed),
                }));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match self.chunk_rx.recv_timeout(remaining) {
                Ok(chunk) => self.assembler.push(&chunk),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(AudioError::StreamClosed),
            }
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    params: &StreamParams,
    running: Arc<AtomicBool>,
    chunk_tx: Sender<Vec<i16>>,
    overflow: Arc<AtomicBool>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError> {
    let device = find_input_device(params.device.as_deref())?;
    let (config, format) = device.input_config(params)?;

    tracing::info!(
        "Opening input '{}': {} Hz, {} ch, {:?}",
        device.name,
        config.sample_rate.0,
        config.channels,
        format
    );

    match format {
        SampleFormat::I16 => build_typed::<i16>(device.inner(), &config, running, chunk_tx, overflow, error_tx),
        SampleFormat::F32 => build_typed::<f32>(device.inner(), &config, running, chunk_tx, overflow, error_tx),
        SampleFormat::U16 => build_typed::<u16>(device.inner(), &config, running, chunk_tx, overflow, error_tx),
        other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    }
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    running: Arc<AtomicBool>,
    chunk_tx: Sender<Vec<i16>>,
    overflow: Arc<AtomicBool>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }

                let run: Vec<i16> = data.iter().map(|&s| i16::from_sample(s)).collect();
                if chunk_tx.try_send(run).is_err() {
                    overflow.store(true, Ordering::Relaxed);
                }
            },
            move |err| match err {
                cpal::StreamError::DeviceNotAvailable => {
                    let _ = error_tx.try_send(AudioError::DeviceNotFound("input device disappeared".to_string()));
                }
                other => tracing::warn!("Input stream error: {}", other),
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}
