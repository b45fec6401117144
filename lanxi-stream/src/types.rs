//! Core types for the LAN-XI stream decoder
//!
//! This module defines the values the decoder emits when processing a
//! measurement stream, and the error taxonomy shared by every stage of the
//! decode loop.

use chrono::{DateTime, Utc};
use std::fmt;
use std::io;

/// Timestamp type used throughout the decoder
pub type Timestamp = DateTime<Utc>;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Numbered measurement signal source (one sensor axis, one input)
pub type ChannelId = u16;

/// Errors that can occur while reading and decoding a measurement stream
///
/// Fatal variants end the session; the rest are reported and the decode loop
/// moves on to the next frame (or sample).
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Stream closed by peer")]
    StreamClosed,

    #[error("Failed to read frame: {0}")]
    FrameRead(#[source] io::Error),

    #[error("Invalid frame header: {0}")]
    InvalidHeader(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u16),

    #[error("No calibration for channel {0}")]
    MissingCalibration(ChannelId),

    #[error("Malformed {message} payload: {reason}")]
    MalformedPayload {
        /// Message kind being decoded
        message: &'static str,
        /// What did not fit
        reason: String,
    },

    #[error("Failed to start flush scheduler: {0}")]
    SchedulerSpawn(#[source] io::Error),

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl StreamError {
    /// True if this error terminates the session
    pub fn is_fatal(&self) -> bool {
        match self {
            StreamError::StreamClosed
            | StreamError::FrameRead(_)
            | StreamError::InvalidHeader(_)
            | StreamError::SchedulerSpawn(_)
            | StreamError::Connect { .. } => true,
            StreamError::UnknownMessageType(_)
            | StreamError::MissingCalibration(_)
            | StreamError::MalformedPayload { .. } => false,
        }
    }

    pub(crate) fn malformed(message: &'static str, reason: impl Into<String>) -> Self {
        StreamError::MalformedPayload {
            message,
            reason: reason.into(),
        }
    }
}

/// One decoded sample from a signal-data group
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSample {
    /// Channel the sample belongs to
    pub channel: ChannelId,
    /// Sign-extended fixed-point value as it came off the wire
    pub raw: i32,
    /// Raw value normalised by the encoding's full-scale range
    pub calculated: f64,
}

/// All samples carried for one channel in a signal-data message
#[derive(Debug, Clone, PartialEq)]
pub struct SignalBlock {
    pub channel: ChannelId,
    /// Raw sign-extended sample values, in wire order
    pub values: Vec<i32>,
}

impl SignalBlock {
    /// Iterate the block as [`SignalSample`]s
    pub fn samples(&self) -> impl Iterator<Item = SignalSample> + '_ {
        self.values.iter().map(move |&raw| SignalSample {
            channel: self.channel,
            raw,
            calculated: crate::protocol::calc_value(raw),
        })
    }
}

/// Interpretation descriptor types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    DataType,
    ScaleFactor,
    Offset,
    PeriodTime,
    Unit,
    VectorLength,
    ChannelType,
    /// Descriptor type not known to this decoder
    Other(u16),
}

impl DescriptorType {
    pub fn from_wire(code: u16) -> Self {
        match code {
            1 => DescriptorType::DataType,
            2 => DescriptorType::ScaleFactor,
            3 => DescriptorType::Offset,
            4 => DescriptorType::PeriodTime,
            5 => DescriptorType::Unit,
            6 => DescriptorType::VectorLength,
            7 => DescriptorType::ChannelType,
            other => DescriptorType::Other(other),
        }
    }
}

/// Decoded value of an interpretation descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum DescriptorValue {
    /// 64-bit float (scale factor, offset)
    Float(f64),
    /// 16-bit code (data type, vector length, channel type)
    Code(u16),
    /// Anything whose layout we do not interpret
    Bytes(Vec<u8>),
}

/// One `(channel, descriptor, value)` tuple from an interpretation message
#[derive(Debug, Clone, PartialEq)]
pub struct Interpretation {
    pub channel: ChannelId,
    pub descriptor: DescriptorType,
    pub value: DescriptorValue,
}

impl Interpretation {
    /// The scale factor carried by this tuple, if it is one
    pub fn scale_factor(&self) -> Option<f64> {
        match (self.descriptor, &self.value) {
            (DescriptorType::ScaleFactor, DescriptorValue::Float(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Validity flags reported per channel in a data-quality message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValidityFlags(pub u16);

impl ValidityFlags {
    pub fn overload(self) -> bool {
        self.0 & crate::protocol::FLAG_OVERLOAD != 0
    }

    pub fn invalid(self) -> bool {
        self.0 & crate::protocol::FLAG_INVALID != 0
    }

    pub fn overrun(self) -> bool {
        self.0 & crate::protocol::FLAG_OVERRUN != 0
    }
}

impl fmt::Display for ValidityFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.overload() {
            names.push("overload");
        }
        if self.invalid() {
            names.push("invalid");
        }
        if self.overrun() {
            names.push("overrun");
        }
        if names.is_empty() {
            write!(f, "ok")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// One `(channel, flags)` tuple from a data-quality message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityReport {
    pub channel: ChannelId,
    pub flags: ValidityFlags,
}

/// Main decoded message type - the output of the message decoder
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Raw samples grouped by channel
    SignalData(Vec<SignalBlock>),

    /// Calibration and format descriptors
    Interpretation(Vec<Interpretation>),

    /// Per-channel validity flags
    DataQuality(Vec<QualityReport>),

    /// A frame whose type tag this decoder does not handle
    Unknown {
        /// Message type tag from the header
        message_type: u16,
        /// Number of payload bytes discarded
        payload_len: usize,
    },
}

impl Message {
    /// Short name used in log output
    pub fn kind(&self) -> &'static str {
        match self {
            Message::SignalData(_) => "signal data",
            Message::Interpretation(_) => "interpretation",
            Message::DataQuality(_) => "data quality",
            Message::Unknown { .. } => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(StreamError::StreamClosed.is_fatal());
        assert!(StreamError::FrameRead(io::ErrorKind::ConnectionReset.into()).is_fatal());
        assert!(StreamError::InvalidHeader("bad magic".into()).is_fatal());
        assert!(StreamError::SchedulerSpawn(io::ErrorKind::WouldBlock.into()).is_fatal());

        assert!(!StreamError::UnknownMessageType(11).is_fatal());
        assert!(!StreamError::MissingCalibration(3).is_fatal());
        assert!(!StreamError::malformed("signal data", "short").is_fatal());
    }

    #[test]
    fn test_scheduler_spawn_not_reported_as_read_error() {
        let err = StreamError::SchedulerSpawn(io::Error::new(io::ErrorKind::Other, "no threads"));
        let message = err.to_string();
        assert!(message.contains("flush scheduler"));
        assert!(!message.contains("read frame"));
    }

    #[test]
    fn test_validity_flags() {
        let flags = ValidityFlags(0x02);
        assert!(flags.overload());
        assert!(!flags.invalid());
        assert_eq!(flags.to_string(), "overload");

        let flags = ValidityFlags(0x02 | 0x08 | 0x10);
        assert!(flags.overload() && flags.invalid() && flags.overrun());
        assert_eq!(flags.to_string(), "overload|invalid|overrun");

        assert_eq!(ValidityFlags::default().to_string(), "ok");
    }

    #[test]
    fn test_descriptor_codes() {
        assert_eq!(DescriptorType::from_wire(2), DescriptorType::ScaleFactor);
        assert_eq!(DescriptorType::from_wire(5), DescriptorType::Unit);
        assert_eq!(DescriptorType::from_wire(42), DescriptorType::Other(42));
    }

    #[test]
    fn test_scale_factor_accessor() {
        let interp = Interpretation {
            channel: 1,
            descriptor: DescriptorType::ScaleFactor,
            value: DescriptorValue::Float(0.5),
        };
        assert_eq!(interp.scale_factor(), Some(0.5));

        let offset = Interpretation {
            channel: 1,
            descriptor: DescriptorType::Offset,
            value: DescriptorValue::Float(0.5),
        };
        assert_eq!(offset.scale_factor(), None);
    }

    #[test]
    fn test_block_samples() {
        let block = SignalBlock {
            channel: 4,
            values: vec![0, -8_388_608],
        };
        let samples: Vec<_> = block.samples().collect();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].channel, 4);
        assert_eq!(samples[1].raw, -8_388_608);
        assert_eq!(samples[1].calculated, -1.0);
    }
}
