//! Stream session configuration
//!
//! The minimal knobs the decode loop and flush scheduler need. Everything
//! about the device's REST lifecycle lives in the application layer.

use crate::frame::DEFAULT_MAX_PAYLOAD_LEN;
use crate::metrics::GaugeLabels;
use crate::types::ChannelId;
use std::time::Duration;

/// Default flush cadence
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a stream session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Device identifier attached to every published gauge
    pub device_id: String,

    /// Device location attached to every published gauge
    pub location: String,

    /// Flush period in milliseconds (default: 1000ms)
    pub flush_interval_ms: u64,

    /// Largest payload a frame header may declare (default: 16 MiB)
    pub max_payload_len: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            device_id: "lanxi-01".to_string(),
            location: "lab-1".to_string(),
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
        }
    }
}

impl StreamConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set device id and location labels
    pub fn with_device(mut self, device_id: impl Into<String>, location: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self.location = location.into();
        self
    }

    /// Builder method: set the flush period
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Builder method: set the payload size limit
    pub fn with_max_payload_len(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Flush period as a [`Duration`], never shorter than one millisecond
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    /// Gauge labels for a channel of this device
    pub fn labels(&self, channel: ChannelId) -> GaugeLabels {
        GaugeLabels::new(&self.device_id, &self.location, channel)
    }
}
