//! Flush scheduler
//!
//! Once per flush period, drains every channel's raw extrema, scales them by
//! the channel's *current* scale factor and publishes `amplitude_min` /
//! `amplitude_max`. Channels without a scale factor are reset without
//! publishing, so a channel calibrated mid-cycle loses that cycle's
//! samples.

use crate::aggregator::ChannelAggregator;
use crate::config::StreamConfig;
use crate::metrics::{MetricsSink, AMPLITUDE_MAX, AMPLITUDE_MIN};
use crossbeam_channel::{select, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Outcome of one flush cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Channels whose extrema were published
    pub published: usize,
    /// Channels reset without publishing (no scale factor)
    pub discarded: usize,
}

/// Run one flush cycle
///
/// Locks are taken per map operation only; the sink is called with no lock
/// held.
pub fn flush_once(
    aggregator: &ChannelAggregator,
    sink: &dyn MetricsSink,
    config: &StreamConfig,
) -> FlushSummary {
    let mut summary = FlushSummary::default();

    for channel in aggregator.channels() {
        let stat = match aggregator.drain_and_reset(channel) {
            Some(stat) if !stat.is_empty() => stat,
            _ => continue,
        };

        match aggregator.calibration().get(channel) {
            Some(factor) => {
                let (min, max) = stat.scaled(factor);
                let labels = config.labels(channel);
                sink.set_gauge(AMPLITUDE_MIN, &labels, min);
                sink.set_gauge(AMPLITUDE_MAX, &labels, max);
                summary.published += 1;
                log::trace!(
                    "Flushed channel {}: min={} max={} ({} samples, factor {})",
                    channel,
                    min,
                    max,
                    stat.count,
                    factor
                );
            }
            None => {
                summary.discarded += 1;
                log::debug!(
                    "Discarded {} samples for channel {} (no scale factor)",
                    stat.count,
                    channel
                );
            }
        }
    }

    summary
}

/// Running totals over a scheduler's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushTotals {
    pub cycles: u64,
    pub published: u64,
    pub discarded: u64,
}

impl FlushTotals {
    fn add(&mut self, summary: FlushSummary) {
        self.cycles += 1;
        self.published += summary.published as u64;
        self.discarded += summary.discarded as u64;
    }
}

/// One scheduled cycle, logged the way the scheduler reports it
fn run_cycle(
    aggregator: &ChannelAggregator,
    sink: &dyn MetricsSink,
    config: &StreamConfig,
) -> FlushSummary {
    let summary = flush_once(aggregator, sink, config);
    log::trace!("Flush cycle: {} channels published", summary.published);
    if summary.discarded > 0 {
        log::debug!(
            "Flush cycle: {} channels discarded awaiting scale factors",
            summary.discarded
        );
    }
    summary
}

/// Handle to a running flush thread
///
/// The thread runs until [`FlushScheduler::stop`] is called or the handle is
/// dropped. A session must stop its scheduler when the stream ends, or the
/// last published values would stay frozen.
pub struct FlushScheduler {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<FlushTotals>>,
}

impl FlushScheduler {
    /// Start flushing `aggregator` into `sink` every `config.flush_interval()`
    pub fn spawn(
        aggregator: Arc<ChannelAggregator>,
        sink: Arc<dyn MetricsSink>,
        config: StreamConfig,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let period = config.flush_interval();

        let handle = std::thread::Builder::new()
            .name("lanxi-flush".into())
            .spawn(move || {
                let ticker = crossbeam_channel::tick(period);
                let mut totals = FlushTotals::default();
                log::debug!("Flush scheduler started (period {:?})", period);

                loop {
                    select! {
                        recv(ticker) -> _ => {
                            totals.add(run_cycle(&aggregator, sink.as_ref(), &config));
                        }
                        recv(stop_rx) -> _ => break,
                    }
                }

                log::debug!(
                    "Flush scheduler stopped after {} cycles ({} published, {} discarded)",
                    totals.cycles,
                    totals.published,
                    totals.discarded
                );
                totals
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the flush thread, wait for it to exit and return its totals
    pub fn stop(mut self) -> FlushTotals {
        self.shutdown()
    }

    fn shutdown(&mut self) -> FlushTotals {
        if let Some(stop_tx) = self.stop_tx.take() {
            // A full channel means a stop is already pending
            let _ = stop_tx.try_send(());
        }
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(totals)) => totals,
            Some(Err(_)) => {
                log::error!("Flush scheduler thread panicked");
                FlushTotals::default()
            }
            None => FlushTotals::default(),
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
