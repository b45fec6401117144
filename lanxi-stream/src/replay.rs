//! Offline replay of a captured stream
//!
//! Feeds a recorded byte stream through the same decode loop as a live
//! session. Flush cycles follow the frames' stream time instead of the wall
//! clock, so the same capture always yields the same publications. A final
//! flush runs when the capture ends.

use crate::config::StreamConfig;
use crate::flush::flush_once;
use crate::frame::{FrameHeader, FrameReader};
use crate::metrics::MetricsSink;
use crate::session::{run_decode_loop_with, SessionEnd, SessionStats, StreamProcessor};
use crate::types::{Result, StreamError};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Result of a replay run
#[derive(Debug)]
pub struct ReplayReport {
    pub end: SessionEnd,
    pub stats: SessionStats,
    /// Flush cycles run, the final one included
    pub flushes: u64,
}

/// Tracks flush boundaries on the stream-time axis
#[derive(Debug)]
struct StreamClock {
    period: f64,
    cycle_end: Option<f64>,
}

impl StreamClock {
    fn new(period: f64) -> Self {
        Self {
            period,
            cycle_end: None,
        }
    }

    /// True if `header` starts a new cycle, i.e. a flush is due before it
    fn crosses_boundary(&mut self, header: &FrameHeader) -> bool {
        let now = header.seconds();
        if !now.is_finite() {
            return false;
        }

        match self.cycle_end {
            None => {
                self.cycle_end = Some(now + self.period);
                false
            }
            Some(end) if now >= end => {
                // Skip over idle periods in one step
                let elapsed = ((now - end) / self.period).floor() + 1.0;
                self.cycle_end = Some(end + elapsed * self.period);
                true
            }
            Some(_) => false,
        }
    }
}

/// Replay a captured stream into `sink`
pub fn replay<R: Read>(stream: R, config: &StreamConfig, sink: &dyn MetricsSink) -> ReplayReport {
    let mut processor = StreamProcessor::new();
    let mut reader = FrameReader::with_max_payload_len(stream, config.max_payload_len);
    let mut clock = StreamClock::new(config.flush_interval().as_secs_f64());
    let mut flushes = 0u64;

    let end = run_decode_loop_with(&mut reader, &mut processor, |header, processor| {
        if clock.crosses_boundary(header) {
            flush_once(processor.aggregator(), sink, config);
            flushes += 1;
        }
    });

    flush_once(processor.aggregator(), sink, config);
    flushes += 1;

    log::info!(
        "Replay finished: {} frames, {} flush cycles",
        processor.stats().frames,
        flushes
    );

    ReplayReport {
        end,
        stats: processor.stats(),
        flushes,
    }
}

/// Replay a capture file
pub fn replay_file<P: AsRef<Path>>(
    path: P,
    config: &StreamConfig,
    sink: &dyn MetricsSink,
) -> Result<ReplayReport> {
    let path = path.as_ref();
    log::info!("Replaying capture {}", path.display());

    let file = File::open(path).map_err(StreamError::FrameRead)?;
    Ok(replay(BufReader::new(file), config, sink))
}
