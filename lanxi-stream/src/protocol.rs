//! LAN-XI streaming wire schema
//!
//! Every offset, width and code the frame reader and message decoder rely
//! on lives here. All multi-byte fields are little-endian.
//!
//! ```text
//! header (28 bytes)
//! ┌───────┬─────────┬──────────┬──────────┬──────────┬────────────┬────────────┬─────────────┐
//! │ "BK"  │ hdr len │ msg type │ reserved │ reserved │ time family│ time count │ payload len │
//! │ 0..2  │ 2..4    │ 4..6     │ 6..8     │ 8..12    │ 12..16     │ 16..24     │ 24..28      │
//! └───────┴─────────┴──────────┴──────────┴──────────┴────────────┴────────────┴─────────────┘
//! ```
//!
//! Payload layouts:
//! - signal data: `u16 count, u16 reserved`, then `count` groups of
//!   `u16 channel, u16 n, n × 24-bit signed sample`
//! - data quality: `u16 count`, then `count` × `u16 channel, u16 flags, u16 reserved`
//! - interpretation: until end of payload, `u16 channel, u16 descriptor,
//!   i16 reserved, u16 len, len bytes`, zero-padded to a 4-byte boundary

/// Magic bytes at the start of every header
pub const MAGIC: [u8; 2] = *b"BK";

/// Fixed header size in bytes
pub const HEADER_SIZE: usize = 28;

pub const OFFSET_HEADER_LENGTH: usize = 2;
pub const OFFSET_MESSAGE_TYPE: usize = 4;
pub const OFFSET_TIME_FAMILY: usize = 12;
pub const OFFSET_TIME_COUNT: usize = 16;
pub const OFFSET_PAYLOAD_LENGTH: usize = 24;

/// Message type tags
pub const MSG_SIGNAL_DATA: u16 = 1;
pub const MSG_DATA_QUALITY: u16 = 2;
pub const MSG_INTERPRETATION: u16 = 8;

/// Signal-data layout
pub const SIGNAL_DATA_PREAMBLE: usize = 4;
pub const SIGNAL_GROUP_HEADER: usize = 4;
pub const SAMPLE_WIDTH: usize = 3;
pub const SAMPLE_BITS: u32 = (SAMPLE_WIDTH * 8) as u32;

/// Data-quality layout
pub const DATA_QUALITY_PREAMBLE: usize = 2;
pub const QUALITY_TUPLE: usize = 6;

/// Validity flag bits
pub const FLAG_OVERLOAD: u16 = 0x02;
pub const FLAG_INVALID: u16 = 0x08;
pub const FLAG_OVERRUN: u16 = 0x10;

/// Interpretation layout
pub const INTERPRETATION_TUPLE_HEADER: usize = 8;
pub const INTERPRETATION_ALIGN: usize = 4;

/// Descriptor value widths with a fixed layout
pub const FLOAT_VALUE_WIDTH: usize = 8;
pub const CODE_VALUE_WIDTH: usize = 2;

/// Full-scale range of a 24-bit sample (2^23)
pub const FULL_SCALE: f64 = (1u32 << (SAMPLE_BITS - 1)) as f64;

/// Sign-extend a value from N bits to 32 bits
///
/// If the value's MSB is 1, fill the upper bits with 1s.
pub fn sign_extend(value: u32, bit_length: u32) -> i32 {
    if bit_length >= 32 {
        return value as i32;
    }

    let shift = 32 - bit_length;
    ((value << shift) as i32) >> shift
}

/// Decode one 3-byte little-endian sample
pub fn decode_sample(bytes: [u8; SAMPLE_WIDTH]) -> i32 {
    let value = u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
    sign_extend(value, SAMPLE_BITS)
}

/// Normalise a raw sample by the encoding's full-scale range
pub fn calc_value(raw: i32) -> f64 {
    f64::from(raw) / FULL_SCALE
}

/// Padding after an interpretation value so the next tuple starts aligned
pub fn padding_after(position: usize) -> usize {
    (INTERPRETATION_ALIGN - position % INTERPRETATION_ALIGN) % INTERPRETATION_ALIGN
}

/// Time family: the tick period is `1 / (2^k · 3^l · 5^m · 7^n)` seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeFamily {
    pub k: u8,
    pub l: u8,
    pub m: u8,
    pub n: u8,
}

impl TimeFamily {
    /// Ticks per second
    pub fn ticks_per_second(&self) -> f64 {
        2f64.powi(i32::from(self.k))
            * 3f64.powi(i32::from(self.l))
            * 5f64.powi(i32::from(self.m))
            * 7f64.powi(i32::from(self.n))
    }
}
