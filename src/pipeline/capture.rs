//! Capture pipeline: input device -> frame codec -> UDP

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::buffer::rms_level;
use crate::audio::{AudioBackend, InputStream, StreamParams};
use crate::codec::FrameEncoder;
use crate::config::AppConfig;
use crate::error::Result;
use crate::metrics::PipelineStats;
use crate::network::{Endpoint, UdpTransport};
use crate::pipeline::should_log;
use crate::signal::StopSignal;

/// Send-side pipeline for one session
pub struct CapturePipeline {
    input: Box<dyn InputStream>,
    transport: UdpTransport,
    encoder: FrameEncoder,
    peer: Endpoint,
    stats: Arc<PipelineStats>,
    read_timeout: Duration,
}

impl CapturePipeline {
    /// Acquire the socket and the input device
    pub fn open(
        config: &AppConfig,
        peer: Endpoint,
        backend: &dyn AudioBackend,
        stats: Arc<PipelineStats>,
    ) -> Result<Self> {
        let transport = UdpTransport::for_peer(&peer)?;
        let input = backend.open_input(&StreamParams::input(&config.audio))?;

        tracing::info!(
            "Capture pipeline ready: {} Hz, {} ch, {} frames/block -> {}",
            config.audio.sample_rate,
            config.audio.channels,
            config.audio.frames_per_chunk,
            peer
        );

        Ok(Self::new(
            input,
            transport,
            FrameEncoder::new(config.audio.layout()),
            peer,
            stats,
            config.session.receive_timeout(),
        ))
    }

    pub fn new(
        input: Box<dyn InputStream>,
        transport: UdpTransport,
        encoder: FrameEncoder,
        peer: Endpoint,
        stats: Arc<PipelineStats>,
        read_timeout: Duration,
    ) -> Self {
        Self {
            input,
            transport,
            encoder,
            peer,
            stats,
            read_timeout,
        }
    }

    /// Read, encode and send blocks until `stop` clears or the device fails
    pub fn run(mut self, stop: &StopSignal) -> Result<()> {
        tracing::info!("Sending to {}", self.peer);

        while stop.is_running() {
            let block = match self.input.read_block(self.read_timeout)? {
                Some(block) => block,
                None => continue,
            };
            if stop.is_stopped() {
                break;
            }

            if block.overflowed {
                let overflows = self.stats.overflows.fetch_add(1, Ordering::Relaxed) + 1;
                if should_log(overflows, 50) {
                    tracing::warn!("Input overflow ({} so far)", overflows);
                }
            }

            let payload = match self.encoder.encode(&block.samples) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("Dropping block: {}", e);
                    continue;
                }
            };
            self.stats.record_level(rms_level(&block.samples));

            match self.transport.send(&self.peer, &payload) {
                Ok(()) => self.stats.packets.increment(),
                Err(e) => {
                    let failures = self.stats.send_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    if should_log(failures, 100) {
                        tracing::warn!("{} ({} failures so far)", e, failures);
                    }
                }
            }
        }

        let sent = self.transport.stats();
        tracing::info!(
            "Capture stopped: {} packets, {:.1} KB sent, {} send failures",
            sent.packets_sent,
            sent.bytes_sent as f64 / 1024.0,
            sent.send_failures
        );
        Ok(())
    }
}
