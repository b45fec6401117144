//! Metrics output interface
//!
//! The flush scheduler publishes through a [`MetricsSink`] handed to it at
//! construction; the decoder never touches a global registry. The sidecar
//! binary provides a Prometheus-backed sink, and [`RecordingSink`] keeps
//! publications in memory for replay and tests.

use crate::types::ChannelId;
use std::sync::{Mutex, PoisonError};

/// Gauge name for the scaled per-cycle minimum
pub const AMPLITUDE_MIN: &str = "amplitude_min";

/// Gauge name for the scaled per-cycle maximum
pub const AMPLITUDE_MAX: &str = "amplitude_max";

/// Labels attached to every amplitude gauge
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GaugeLabels {
    pub device_id: String,
    pub location: String,
    pub channel: String,
}

impl GaugeLabels {
    pub fn new(device_id: &str, location: &str, channel: ChannelId) -> Self {
        Self {
            device_id: device_id.to_string(),
            location: location.to_string(),
            channel: channel.to_string(),
        }
    }
}

/// Receives gauge updates
pub trait MetricsSink: Send + Sync {
    /// Set gauge `name` with the given labels to `value`
    fn set_gauge(&self, name: &str, labels: &GaugeLabels, value: f64);
}

/// A single gauge publication
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub name: String,
    pub labels: GaugeLabels,
    pub value: f64,
}

/// In-memory sink recording every publication in order
#[derive(Debug, Default)]
pub struct RecordingSink {
    publications: Mutex<Vec<Publication>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All publications so far, oldest first
    pub fn publications(&self) -> Vec<Publication> {
        self.publications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent value published for `name` on `channel`
    pub fn latest(&self, name: &str, channel: ChannelId) -> Option<f64> {
        let channel = channel.to_string();
        self.publications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|p| p.name == name && p.labels.channel == channel)
            .map(|p| p.value)
    }

    /// Remove and return all publications
    pub fn take(&self) -> Vec<Publication> {
        std::mem::take(&mut *self.publications.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl MetricsSink for RecordingSink {
    fn set_gauge(&self, name: &str, labels: &GaugeLabels, value: f64) {
        self.publications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Publication {
                name: name.to_string(),
                labels: labels.clone(),
                value,
            });
    }
}
