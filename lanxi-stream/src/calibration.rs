//! Per-channel scale factors
//!
//! Written by the decode loop when an interpretation message carries a
//! scale-factor descriptor, read by the decode loop (to gate samples) and by
//! the flush scheduler (to scale extrema). Last write wins; no history.

use crate::types::ChannelId;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Thread-safe channel → scale factor map
#[derive(Debug, Default)]
pub struct CalibrationStore {
    factors: RwLock<HashMap<ChannelId, f64>>,
}

impl CalibrationStore {
    /// Create an empty store (the state at stream connect)
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scale factor for a channel, replacing any previous value
    ///
    /// Returns the factor that was replaced, if any.
    pub fn set(&self, channel: ChannelId, factor: f64) -> Option<f64> {
        self.factors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, factor)
    }

    /// Current scale factor for a channel
    pub fn get(&self, channel: ChannelId) -> Option<f64> {
        self.factors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .copied()
    }

    /// True if a scale factor is known for the channel
    pub fn contains(&self, channel: ChannelId) -> bool {
        self.factors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&channel)
    }

    /// Number of calibrated channels
    pub fn len(&self) -> usize {
        self.factors.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
