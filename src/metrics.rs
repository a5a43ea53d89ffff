//! Throughput and level metrics
//!
//! Pipelines bump atomic counters in [`PipelineStats`]. A single
//! [`MetricsAggregator`] reads-and-resets the packet counter once per second
//! and pushes the count into a ten-slot [`MetricsWindow`] whose average is
//! the reported packets/s.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::constants::METRICS_WINDOW_SECONDS;
use crate::signal::StopSignal;

/// Packet counter incremented by a worker and drained by the reporter
#[derive(Debug, Default)]
pub struct PacketCounter(AtomicU64);

impl PacketCounter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically read and reset
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::AcqRel)
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fixed-capacity FIFO of per-second packet counts
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    counts: VecDeque<u64>,
    capacity: usize,
}

impl MetricsWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            counts: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert a count, evicting the oldest when full
    pub fn push(&mut self, count: u64) {
        if self.capacity == 0 {
            return;
        }
        if self.counts.len() == self.capacity {
            self.counts.pop_front();
        }
        self.counts.push_back(count);
    }

    /// Mean of the retained counts; 0.0 when empty
    pub fn average(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        self.counts.iter().sum::<u64>() as f64 / self.counts.len() as f64
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

}

impl Default for MetricsWindow {
    fn default() -> Self {
        Self::new(METRICS_WINDOW_SECONDS)
    }
}

/// Counters shared between a pipeline worker and the reporter
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub packets: PacketCounter,
    pub overflows: AtomicU64,
    pub send_failures: AtomicU64,
    pub receive_errors: AtomicU64,
    pub rejected: AtomicU64,
    pub dropped_writes: AtomicU64,
    level_sum_micro: AtomicU64,
    level_blocks: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record the RMS level (0.0 - 1.0) of one block
    pub fn record_level(&self, level: f32) {
        let micro = (level.clamp(0.0, 1.0) as f64 * 1_000_000.0) as u64;
        self.level_sum_micro.fetch_add(micro, Ordering::Relaxed);
        self.level_blocks.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean level since the last call, if any block was recorded
    pub fn take_level(&self) -> Option<f32> {
        let sum = self.level_sum_micro.swap(0, Ordering::AcqRel);
        let blocks = self.level_blocks.swap(0, Ordering::AcqRel);
        if blocks == 0 {
            None
        } else {
            Some((sum as f64 / blocks as f64 / 1_000_000.0) as f32)
        }
    }
}

/// One aggregation tick
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub packets_last_second: u64,
    /// Rolling packets/s over the window
    pub average: f64,
    pub level: Option<f32>,
}

/// Drains [`PipelineStats`] into a rolling window
pub struct MetricsAggregator {
    stats: Arc<PipelineStats>,
    window: Arc<Mutex<MetricsWindow>>,
}

impl MetricsAggregator {
    pub fn new(stats: Arc<PipelineStats>) -> Self {
        Self {
            stats,
            window: Arc::new(Mutex::new(MetricsWindow::default())),
        }
    }

    pub fn tick(&self) -> Report {
        let packets = self.stats.packets.take();
        let mut window = self.window.lock();
        window.push(packets);
        Report {
            packets_last_second: packets,
            average: window.average(),
            level: self.stats.take_level(),
        }
    }

    pub fn window(&self) -> Arc<Mutex<MetricsWindow>> {
        self.window.clone()
    }
}

/// Level as a `*` bar padded to 20 columns
pub fn volume_bar(level: f32) -> String {
    let bars = ((level * 20.0) as usize).clamp(1, 20);
    format!("{:<20}", "*".repeat(bars))
}

/// Background once-per-second aggregator for one session
pub struct MetricsReporter {
    stop: StopSignal,
    handle: Option<JoinHandle<()>>,
    window: Arc<Mutex<MetricsWindow>>,
}

impl MetricsReporter {
    /// Start reporting on `stats`; `label` names the session in log lines
    pub fn spawn(stats: Arc<PipelineStats>, label: &'static str, verbose: bool) -> std::io::Result<Self> {
        let aggregator = MetricsAggregator::new(stats);
        let window = aggregator.window();
        let stop = StopSignal::new();
        let thread_stop = stop.clone();

        let handle = thread::Builder::new()
            .name(format!("metrics-{}", label))
            .spawn(move || {
                let mut next = Instant::now() + Duration::from_secs(1);
                while thread_stop.is_running() {
                    let now = Instant::now();
                    if now < next {
                        thread::sleep((next - now).min(Duration::from_millis(100)));
                        continue;
                    }
                    next += Duration::from_secs(1);

                    let report = aggregator.tick();
                    if verbose {
                        match report.level {
                            Some(level) => tracing::info!(
                                "{}: packets: {:5} volume: {}",
                                label,
                                report.packets_last_second,
                                volume_bar(level)
                            ),
                            None => tracing::info!("{}: packets: {:5}", label, report.packets_last_second),
                        }
                    }
                    tracing::debug!("{}: {:.1} packets/s (last 10s)", label, report.average);
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
            window,
        })
    }

    pub fn average(&self) -> f64 {
        self.window.lock().average()
    }

    pub fn stop(&mut self) {
        self.stop.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MetricsReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
