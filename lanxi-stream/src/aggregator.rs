//! Per-channel running min/max/count of raw sample values
//!
//! Samples are only accepted for channels that already have a scale factor;
//! anything earlier is dropped, not deferred. Extrema are kept unscaled and
//! only converted to physical units at flush time.

use crate::calibration::CalibrationStore;
use crate::types::{ChannelId, Result, StreamError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Running extrema of raw values since the last flush
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStat {
    pub min: f64,
    pub max: f64,
    pub count: u64,
}

impl Default for ChannelStat {
    fn default() -> Self {
        Self {
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            count: 0,
        }
    }
}

impl ChannelStat {
    /// Fold one raw value into the running extrema
    pub fn record(&mut self, raw: i32) {
        let value = f64::from(raw);
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
        self.count += 1;
    }

    /// True if nothing was recorded since the last reset
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Extrema multiplied by a scale factor, as `(min, max)`
    pub fn scaled(&self, factor: f64) -> (f64, f64) {
        (self.min * factor, self.max * factor)
    }
}

/// Thread-safe per-channel aggregator
#[derive(Debug)]
pub struct ChannelAggregator {
    calibration: Arc<CalibrationStore>,
    stats: Mutex<HashMap<ChannelId, ChannelStat>>,
}

impl ChannelAggregator {
    /// Create an aggregator gated by the given calibration store
    pub fn new(calibration: Arc<CalibrationStore>) -> Self {
        Self {
            calibration,
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Record one raw sample
    ///
    /// # Returns
    /// * `Err(MissingCalibration)` if the channel has no scale factor yet; the
    ///   sample is dropped
    pub fn observe(&self, channel: ChannelId, raw: i32) -> Result<()> {
        self.observe_block(channel, &[raw]).map(|_| ())
    }

    /// Record a whole signal group under a single lock acquisition
    ///
    /// Returns the number of samples accepted.
    pub fn observe_block(&self, channel: ChannelId, raws: &[i32]) -> Result<usize> {
        if !self.calibration.contains(channel) {
            return Err(StreamError::MissingCalibration(channel));
        }

        let mut stats = self.lock();
        let stat = stats.entry(channel).or_default();
        for &raw in raws {
            stat.record(raw);
        }
        Ok(raws.len())
    }

    /// Read a channel's stat and reset it to the sentinel state atomically
    ///
    /// The entry itself is kept; only its contents are reset.
    pub fn drain_and_reset(&self, channel: ChannelId) -> Option<ChannelStat> {
        self.lock()
            .get_mut(&channel)
            .map(std::mem::take)
    }

    /// Channels that have an entry (accepted at least one sample this session)
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<_> = self.lock().keys().copied().collect();
        channels.sort_unstable();
        channels
    }

    /// Copy of a channel's current stat, without resetting it
    pub fn stat(&self, channel: ChannelId) -> Option<ChannelStat> {
        self.lock().get(&channel).copied()
    }

    /// Calibration store this aggregator is gated by
    pub fn calibration(&self) -> &Arc<CalibrationStore> {
        &self.calibration
    }

    /// Record samples bypassing the calibration gate
    #[cfg(test)]
    pub(crate) fn observe_ungated(&self, channel: ChannelId, raws: &[i32]) {
        let mut stats = self.lock();
        let stat = stats.entry(channel).or_default();
        for &raw in raws {
            stat.record(raw);
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ChannelId, ChannelStat>> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
