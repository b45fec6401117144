//! LAN-XI Stream Library
//!
//! Decodes the binary measurement stream of a LAN-XI data-acquisition module
//! and condenses it into per-channel amplitude extrema.
//!
//! # Architecture
//!
//! This library covers everything between the measurement socket and the
//! metrics sink:
//! - Reads length-delimited frames (28-byte header + payload)
//! - Decodes SignalData, Interpretation and DataQuality messages
//! - Keeps per-channel scale factors learned from Interpretation messages
//! - Aggregates raw min/max per channel and flushes scaled values periodically
//!
//! The library does NOT:
//! - Talk to the module's REST API
//! - Serve HTTP or own a Prometheus registry
//! - Reconnect after the stream ends
//!
//! All of that lives in the application layer (lanxi-monitor).
//!
//! # Example Usage
//!
//! ```no_run
//! use lanxi_stream::{RecordingSink, StreamConfig, StreamSession};
//! use std::sync::Arc;
//!
//! let config = StreamConfig::new().with_device("lanxi-01", "lab-1");
//! let (session, closer) = StreamSession::connect("169.254.61.199", 42000, config).unwrap();
//!
//! // `closer.close()` from another thread ends the session
//! let sink = Arc::new(RecordingSink::new());
//! let report = session.run(sink.clone());
//! println!("Session ended: {:?} after {} frames", report.end, report.stats.frames);
//! # drop(closer);
//! ```

// Public modules
pub mod aggregator;
pub mod calibration;
pub mod config;
pub mod flush;
pub mod frame;
pub mod message_decoder;
pub mod metrics;
pub mod protocol;
pub mod replay;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use aggregator::{ChannelAggregator, ChannelStat};
pub use calibration::CalibrationStore;
pub use config::StreamConfig;
pub use flush::{flush_once, FlushScheduler, FlushSummary, FlushTotals};
pub use frame::{Frame, FrameHeader, FrameReader};
pub use message_decoder::MessageDecoder;
pub use metrics::{GaugeLabels, MetricsSink, Publication, RecordingSink, AMPLITUDE_MAX, AMPLITUDE_MIN};
pub use replay::{replay, replay_file, ReplayReport};
pub use session::{
    run_decode_loop, run_session, SessionEnd, SessionReport, SessionStats, StreamCloser,
    StreamProcessor, StreamSession,
};
pub use types::{
    ChannelId, DescriptorType, DescriptorValue, Interpretation, Message, QualityReport, Result,
    SignalBlock, SignalSample, StreamError, Timestamp, ValidityFlags,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
