//! Playback pipeline: UDP -> frame codec -> output device

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::audio::buffer::rms_level;
use crate::audio::{AudioBackend, OutputStream, StreamParams, WriteOutcome};
use crate::codec::FrameDecoder;
use crate::config::AppConfig;
use crate::constants::{MAX_CONSECUTIVE_RECEIVE_ERRORS, RECEIVE_ERROR_BACKOFF};
use crate::error::Result;
use crate::metrics::PipelineStats;
use crate::network::{Received, UdpTransport};
use crate::pipeline::{should_log, ErrorStreak};
use crate::signal::StopSignal;

/// Receive-side pipeline for one session
pub struct PlaybackPipeline {
    output: Box<dyn OutputStream>,
    transport: UdpTransport,
    decoder: FrameDecoder,
    stats: Arc<PipelineStats>,
    write_timeout: Duration,
}

impl PlaybackPipeline {
    /// Bind the listen socket, then open the output device
    pub fn open(
        config: &AppConfig,
        listen: SocketAddr,
        backend: &dyn AudioBackend,
        stats: Arc<PipelineStats>,
    ) -> Result<Self> {
        let transport = UdpTransport::bind(listen, config.session.receive_timeout())?;
        let output = backend.open_output(&StreamParams::output(&config.audio))?;

        tracing::info!(
            "Playback pipeline ready: {} Hz, {} ch, {} frames/block on {}",
            config.audio.sample_rate,
            config.audio.channels,
            config.audio.frames_per_chunk,
            transport.local_addr()
        );

        Ok(Self::new(
            output,
            transport,
            FrameDecoder::new(config.audio.layout()),
            stats,
            config.audio.block_duration() * 2,
        ))
    }

    pub fn new(
        output: Box<dyn OutputStream>,
        transport: UdpTransport,
        decoder: FrameDecoder,
        stats: Arc<PipelineStats>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            output,
            transport,
            decoder,
            stats,
            write_timeout,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Receive, validate and play blocks until `stop` clears or the device fails
    pub fn run(mut self, stop: &StopSignal) -> Result<()> {
        tracing::info!("Listening on {}", self.transport.local_addr());

        // One spare byte so oversized datagrams show up as a length mismatch
        let mut buf = vec![0u8; self.decoder.layout().packet_size() + 1];
        let mut receive_streak = ErrorStreak::new(MAX_CONSECUTIVE_RECEIVE_ERRORS);

        while stop.is_running() {
            let (len, from) = match self.transport.receive(&mut buf) {
                Ok(Received::Datagram { len, from }) => {
                    receive_streak.reset();
                    (len, from)
                }
                Ok(Received::Timeout) => {
                    receive_streak.reset();
                    continue;
                }
                Err(e) => {
                    let errors = self.stats.receive_errors.fetch_add(1, Ordering::Relaxed) + 1;
                    if receive_streak.fail() {
                        tracing::error!("Socket keeps failing, ending playback: {}", e);
                        return Err(e.into());
                    }
                    if should_log(errors, 100) {
                        tracing::warn!("{} ({} receive errors so far)", e, errors);
                    }
                    thread::sleep(RECEIVE_ERROR_BACKOFF);
                    continue;
                }
            };
            if stop.is_stopped() {
                break;
            }

            let frame = match self.decoder.decode(&buf[..len]) {
                Ok(frame) => frame,
                Err(rejected) => {
                    let count = self.stats.rejected.fetch_add(1, Ordering::Relaxed) + 1;
                    if should_log(count, 100) {
                        tracing::debug!(
                            "Dropped {} byte datagram from {} (expected {})",
                            rejected.actual,
                            from,
                            rejected.expected
                        );
                    }
                    continue;
                }
            };

            match self.output.write_block(frame.samples(), self.write_timeout)? {
                WriteOutcome::Written => {
                    self.stats.packets.increment();
                    self.stats.record_level(rms_level(frame.samples()));
                }
                WriteOutcome::Dropped => {
                    let dropped = self.stats.dropped_writes.fetch_add(1, Ordering::Relaxed) + 1;
                    if should_log(dropped, 50) {
                        tracing::warn!("Output buffer full, dropped block ({} so far)", dropped);
                    }
                }
            }
        }

        let decoded = self.decoder.stats();
        tracing::info!(
            "Playback stopped: {} blocks played, {} datagrams rejected",
            decoded.frames_decoded,
            decoded.frames_rejected
        );
        Ok(())
    }
}
