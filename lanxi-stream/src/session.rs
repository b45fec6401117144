//! Stream session and decode loop
//!
//! A session owns one measurement socket. Its decode loop is the only reader
//! of the socket and the only writer of the calibration store; the flush
//! scheduler runs beside it on its own thread for as long as the session
//! lives.
//!
//! ```text
//! Connected → ReadHeader → ReadPayload → Dispatch → ReadHeader → …
//!                 └──────────────┴─── EOF / I/O error ──→ Closed
//! ```
//!
//! The loop blocks on socket reads indefinitely; the only way to interrupt
//! it is to close the connection through the session's [`StreamCloser`].

use crate::aggregator::ChannelAggregator;
use crate::calibration::CalibrationStore;
use crate::config::StreamConfig;
use crate::flush::{FlushScheduler, FlushTotals};
use crate::frame::{Frame, FrameHeader, FrameReader};
use crate::message_decoder::MessageDecoder;
use crate::metrics::MetricsSink;
use crate::types::{
    Interpretation, Message, QualityReport, Result, SignalBlock, StreamError, Timestamp,
};
use std::io::{self, ErrorKind, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

/// Counters gathered over one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u64,
    pub signal_frames: u64,
    pub interpretation_frames: u64,
    pub quality_frames: u64,
    pub unknown_frames: u64,
    pub malformed_frames: u64,
    pub samples_accepted: u64,
    pub samples_dropped: u64,
    pub scale_factor_updates: u64,
    pub overloads: u64,
    /// Stream time of the first frame with a representable timestamp
    pub first_stream_time: Option<Timestamp>,
    /// Stream time of the most recent such frame
    pub last_stream_time: Option<Timestamp>,
}

/// Why a session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed the stream between frames
    Closed,
    /// A fatal read or framing error
    Failed(StreamError),
}

impl SessionEnd {
    fn from_error(err: StreamError) -> Self {
        match err {
            StreamError::StreamClosed => SessionEnd::Closed,
            other => SessionEnd::Failed(other),
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, SessionEnd::Closed)
    }
}

/// Definite end-of-stream signal returned to the orchestrator
#[derive(Debug)]
pub struct SessionReport {
    pub end: SessionEnd,
    pub stats: SessionStats,
    pub flush: FlushTotals,
}

/// Applies decoded messages to the calibration store and aggregator
pub struct StreamProcessor {
    calibration: Arc<CalibrationStore>,
    aggregator: Arc<ChannelAggregator>,
    stats: SessionStats,
}

impl StreamProcessor {
    /// Create a processor with empty calibration and aggregation state
    pub fn new() -> Self {
        let calibration = Arc::new(CalibrationStore::new());
        let aggregator = Arc::new(ChannelAggregator::new(Arc::clone(&calibration)));
        Self {
            calibration,
            aggregator,
            stats: SessionStats::default(),
        }
    }

    pub fn calibration(&self) -> &Arc<CalibrationStore> {
        &self.calibration
    }

    pub fn aggregator(&self) -> &Arc<ChannelAggregator> {
        &self.aggregator
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Decode one frame and apply it
    ///
    /// Non-fatal problems (unknown type, malformed payload) are logged and
    /// counted; the frame is skipped as a whole.
    pub fn handle_frame(&mut self, frame: &Frame) {
        self.stats.frames += 1;

        if let Some(time) = frame.header.timestamp() {
            if self.stats.first_stream_time.is_none() {
                log::info!("First frame at stream time {}", time);
                self.stats.first_stream_time = Some(time);
            }
            self.stats.last_stream_time = Some(time);
        }

        match MessageDecoder::decode(frame) {
            Ok(message) => self.apply(message),
            Err(e) => {
                self.stats.malformed_frames += 1;
                log::warn!(
                    "Skipping frame (type {}, {} bytes): {}",
                    frame.header.message_type,
                    frame.payload.len(),
                    e
                );
            }
        }
    }

    /// Apply a decoded message
    pub fn apply(&mut self, message: Message) {
        log::trace!("Dispatching {} message", message.kind());

        match message {
            Message::SignalData(blocks) => {
                self.stats.signal_frames += 1;
                self.apply_signal_data(&blocks);
            }
            Message::Interpretation(items) => {
                self.stats.interpretation_frames += 1;
                self.apply_interpretations(&items);
            }
            Message::DataQuality(reports) => {
                self.stats.quality_frames += 1;
                self.apply_data_quality(&reports);
            }
            Message::Unknown {
                message_type,
                payload_len,
            } => {
                self.stats.unknown_frames += 1;
                log::info!(
                    "{}, discarded {} payload bytes",
                    StreamError::UnknownMessageType(message_type),
                    payload_len
                );
            }
        }
    }

    fn apply_signal_data(&mut self, blocks: &[SignalBlock]) {
        for block in blocks {
            if log::log_enabled!(log::Level::Trace) {
                let peak = block
                    .samples()
                    .map(|sample| sample.calculated.abs())
                    .fold(0.0, f64::max);
                log::trace!(
                    "Channel {}: {} samples, peak {:.6} of full scale",
                    block.channel,
                    block.values.len(),
                    peak
                );
            }

            match self.aggregator.observe_block(block.channel, &block.values) {
                Ok(accepted) => self.stats.samples_accepted += accepted as u64,
                Err(e) => {
                    self.stats.samples_dropped += block.values.len() as u64;
                    log::trace!("Dropped {} samples: {}", block.values.len(), e);
                }
            }
        }
    }

    fn apply_interpretations(&mut self, items: &[Interpretation]) {
        for item in items {
            let Some(factor) = item.scale_factor() else {
                log::trace!(
                    "Ignoring {:?} descriptor for channel {}",
                    item.descriptor,
                    item.channel
                );
                continue;
            };

            self.stats.scale_factor_updates += 1;
            match self.calibration.set(item.channel, factor) {
                None => log::info!("Scale factor for channel {}: {}", item.channel, factor),
                Some(previous) if previous != factor => log::info!(
                    "Scale factor for channel {} changed: {} -> {}",
                    item.channel,
                    previous,
                    factor
                ),
                Some(_) => {}
            }
        }
    }

    fn apply_data_quality(&mut self, reports: &[QualityReport]) {
        for report in reports {
            if report.flags.overload() {
                self.stats.overloads += 1;
                log::warn!("Signal overload detected: signal_id={}", report.channel);
            }
            if report.flags.invalid() || report.flags.overrun() {
                log::debug!(
                    "Data quality for signal_id={}: {}",
                    report.channel,
                    report.flags
                );
            }
        }
    }
}

impl Default for StreamProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Read and dispatch frames until the stream ends
pub fn run_decode_loop<R: Read>(
    reader: &mut FrameReader<R>,
    processor: &mut StreamProcessor,
) -> SessionEnd {
    run_decode_loop_with(reader, processor, |_, _| {})
}

/// Decode loop with a hook called for each frame header before dispatch
pub(crate) fn run_decode_loop_with<R, F>(
    reader: &mut FrameReader<R>,
    processor: &mut StreamProcessor,
    mut before_dispatch: F,
) -> SessionEnd
where
    R: Read,
    F: FnMut(&FrameHeader, &StreamProcessor),
{
    loop {
        match reader.read_frame() {
            Ok(frame) => {
                before_dispatch(&frame.header, processor);
                processor.handle_frame(&frame);
            }
            Err(e) if !e.is_fatal() => log::warn!("Skipping frame: {}", e),
            Err(e) => {
                let end = SessionEnd::from_error(e);
                match &end {
                    SessionEnd::Closed => log::info!(
                        "Stream connection closed after {} frames ({} bytes)",
                        reader.frames_read(),
                        reader.bytes_read()
                    ),
                    SessionEnd::Failed(e) => log::error!(
                        "Stream session failed after {} frames ({} bytes): {}",
                        reader.frames_read(),
                        reader.bytes_read(),
                        e
                    ),
                }
                return end;
            }
        }
    }
}

/// Run a full session over any byte stream: flush thread + decode loop
///
/// The flush scheduler is stopped before this returns.
pub fn run_session<R: Read>(
    stream: R,
    config: &StreamConfig,
    sink: Arc<dyn MetricsSink>,
) -> SessionReport {
    let mut processor = StreamProcessor::new();
    let mut reader = FrameReader::with_max_payload_len(stream, config.max_payload_len);

    let scheduler = match FlushScheduler::spawn(
        Arc::clone(processor.aggregator()),
        sink,
        config.clone(),
    )
    .map_err(StreamError::SchedulerSpawn)
    {
        Ok(scheduler) => scheduler,
        Err(e) => {
            log::error!("{}", e);
            return SessionReport {
                end: SessionEnd::Failed(e),
                stats: processor.stats(),
                flush: FlushTotals::default(),
            };
        }
    };

    let end = run_decode_loop(&mut reader, &mut processor);
    let flush = scheduler.stop();

    SessionReport {
        end,
        stats: processor.stats(),
        flush,
    }
}

/// Closes a session's socket from another thread
///
/// This is the only cancellation path: the blocked read returns and the
/// decode loop ends.
#[derive(Debug)]
pub struct StreamCloser {
    stream: TcpStream,
}

impl StreamCloser {
    pub fn close(&self) {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => log::debug!("Measurement socket closed"),
            Err(e) => log::debug!("Measurement socket already closed: {}", e),
        }
    }
}

/// A connected measurement socket
pub struct StreamSession {
    stream: TcpStream,
    config: StreamConfig,
}

impl StreamSession {
    /// Connect to the module's streaming port
    ///
    /// Returns the session together with a handle that can close it.
    pub fn connect(host: &str, port: u16, config: StreamConfig) -> Result<(Self, StreamCloser)> {
        Self::open(host, port, config, None)
    }

    /// Like [`StreamSession::connect`], giving up on each resolved address
    /// after `timeout`
    pub fn connect_timeout(
        host: &str,
        port: u16,
        config: StreamConfig,
        timeout: Duration,
    ) -> Result<(Self, StreamCloser)> {
        Self::open(host, port, config, Some(timeout))
    }

    fn open(
        host: &str,
        port: u16,
        config: StreamConfig,
        timeout: Option<Duration>,
    ) -> Result<(Self, StreamCloser)> {
        let addr = format!("{}:{}", host, port);
        log::info!("Connecting to measurement stream at {}", addr);

        let connected = match timeout {
            Some(timeout) => connect_with_timeout(&addr, timeout),
            None => TcpStream::connect(addr.as_str()),
        };
        let stream = connected.map_err(|source| StreamError::Connect {
            addr: addr.clone(),
            source,
        })?;
        let closer = stream
            .try_clone()
            .map_err(|source| StreamError::Connect { addr, source })?;

        Ok((
            Self { stream, config },
            StreamCloser { stream: closer },
        ))
    }

    /// Run the session until the stream ends
    pub fn run(self, sink: Arc<dyn MetricsSink>) -> SessionReport {
        run_session(self.stream, &self.config, sink)
    }
}

fn connect_with_timeout(addr: &str, timeout: Duration) -> io::Result<TcpStream> {
    let mut last_error = None;
    for resolved in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&resolved, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(ErrorKind::InvalidInput, format!("{} resolved to no addresses", addr))
    }))
}
