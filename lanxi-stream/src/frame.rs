//! Wire frame reader
//!
//! Reads one length-delimited frame (28-byte header + payload) at a time
//! from any blocking byte stream. The reader does not look inside the
//! payload; that is the message decoder's job.

use crate::protocol::{self, TimeFamily, HEADER_SIZE, MAGIC};
use crate::types::{Result, StreamError, Timestamp};
use byteorder::{ByteOrder, LittleEndian};
use chrono::DateTime;
use std::io::{ErrorKind, Read};

/// Default upper bound on a single payload (16 MiB)
pub const DEFAULT_MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Header length as declared by the sender
    pub header_length: u16,
    /// Message type tag
    pub message_type: u16,
    /// Time family of `time_count`
    pub time_family: TimeFamily,
    /// Stream time in ticks of `time_family`
    pub time_count: u64,
    /// Number of payload bytes following the header
    pub payload_length: u32,
}

impl FrameHeader {
    /// Parse a header from its fixed-size wire representation
    pub fn parse(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        if buf[..2] != MAGIC {
            return Err(StreamError::InvalidHeader(format!(
                "bad magic {:02X} {:02X}",
                buf[0], buf[1]
            )));
        }

        let family = &buf[protocol::OFFSET_TIME_FAMILY..protocol::OFFSET_TIME_FAMILY + 4];

        Ok(FrameHeader {
            header_length: LittleEndian::read_u16(&buf[protocol::OFFSET_HEADER_LENGTH..]),
            message_type: LittleEndian::read_u16(&buf[protocol::OFFSET_MESSAGE_TYPE..]),
            time_family: TimeFamily {
                k: family[0],
                l: family[1],
                m: family[2],
                n: family[3],
            },
            time_count: LittleEndian::read_u64(&buf[protocol::OFFSET_TIME_COUNT..]),
            payload_length: LittleEndian::read_u32(&buf[protocol::OFFSET_PAYLOAD_LENGTH..]),
        })
    }

    /// Stream time in seconds
    pub fn seconds(&self) -> f64 {
        self.time_count as f64 / self.time_family.ticks_per_second()
    }

    /// Stream time as an absolute UTC timestamp
    pub fn timestamp(&self) -> Option<Timestamp> {
        let seconds = self.seconds();
        if !seconds.is_finite() || seconds < 0.0 || seconds > i64::MAX as f64 {
            return None;
        }
        let secs = seconds.trunc() as i64;
        let nsecs = (seconds.fract() * 1e9) as u32;
        DateTime::from_timestamp(secs, nsecs)
    }
}

/// One complete frame as read off the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

/// Reads frames from a blocking byte stream
///
/// The reader never buffers across frames: each call consumes exactly
/// `HEADER_SIZE + payload_length` bytes or fails.
pub struct FrameReader<R> {
    inner: R,
    max_payload_len: usize,
    frames_read: u64,
    bytes_read: u64,
}

impl<R: Read> FrameReader<R> {
    /// Create a reader with the default payload limit
    pub fn new(inner: R) -> Self {
        Self::with_max_payload_len(inner, DEFAULT_MAX_PAYLOAD_LEN)
    }

    /// Create a reader rejecting payloads longer than `max_payload_len`
    pub fn with_max_payload_len(inner: R, max_payload_len: usize) -> Self {
        Self {
            inner,
            max_payload_len,
            frames_read: 0,
            bytes_read: 0,
        }
    }

    /// Read the next frame
    ///
    /// # Returns
    /// * `Err(StreamClosed)` if the stream ended cleanly between frames
    /// * `Err(FrameRead)` on any I/O failure, including EOF mid-frame
    /// * `Err(InvalidHeader)` if framing is lost (bad magic, oversized payload)
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut buf = [0u8; HEADER_SIZE];
        self.read_header_bytes(&mut buf)?;
        let header = FrameHeader::parse(&buf)?;

        let len = header.payload_length as usize;
        if len > self.max_payload_len {
            return Err(StreamError::InvalidHeader(format!(
                "payload length {} exceeds limit {}",
                len, self.max_payload_len
            )));
        }

        let mut payload = vec![0u8; len];
        self.inner
            .read_exact(&mut payload)
            .map_err(StreamError::FrameRead)?;

        self.frames_read += 1;
        self.bytes_read += (HEADER_SIZE + len) as u64;

        log::trace!(
            "Frame: type {} payload {} bytes at t={:.6}s",
            header.message_type,
            len,
            header.seconds()
        );

        Ok(Frame { header, payload })
    }

    /// Number of complete frames read so far
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Number of bytes consumed by complete frames
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Fill the header buffer, telling a clean close apart from a torn frame
    fn read_header_bytes(&mut self, buf: &mut [u8; HEADER_SIZE]) -> Result<()> {
        let mut filled = 0;
        while filled < HEADER_SIZE {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) if filled == 0 => return Err(StreamError::StreamClosed),
                Ok(0) => {
                    return Err(StreamError::FrameRead(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        format!("stream ended after {} of {} header bytes", filled, HEADER_SIZE),
                    )))
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(StreamError::FrameRead(e)),
            }
        }
        Ok(())
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Frame>;

    /// Yields frames until the first fatal error, which is yielded once
    /// (except a clean close, which simply ends iteration)
    fn next(&mut self) -> Option<Self::Item> {
        match self.read_frame() {
            Ok(frame) => Some(Ok(frame)),
            Err(StreamError::StreamClosed) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
