//! Message Decoding Engine
//!
//! Interprets a frame's payload by its header type tag. Decoding is pure:
//! a frame is turned into a [`Message`] in one piece or rejected as
//! malformed, so nothing from a bad frame ever reaches the aggregator or
//! the calibration store.

use crate::frame::Frame;
use crate::protocol;
use crate::types::{
    DescriptorType, DescriptorValue, Interpretation, Message, QualityReport, Result,
    SignalBlock, StreamError, ValidityFlags,
};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};

const SIGNAL_DATA: &str = "signal data";
const DATA_QUALITY: &str = "data quality";
const INTERPRETATION: &str = "interpretation";

/// Message decoder - turns frame payloads into typed messages
pub struct MessageDecoder;

impl MessageDecoder {
    /// Decode a frame into a [`Message`]
    ///
    /// # Returns
    /// * `Ok(Message::Unknown { .. })` for type tags this decoder does not handle
    /// * `Err(MalformedPayload)` if declared group sizes exceed the payload
    pub fn decode(frame: &Frame) -> Result<Message> {
        Self::decode_payload(frame.header.message_type, &frame.payload)
    }

    /// Decode a raw payload given its message type tag
    pub fn decode_payload(message_type: u16, payload: &[u8]) -> Result<Message> {
        match message_type {
            protocol::MSG_SIGNAL_DATA => Self::decode_signal_data(payload).map(Message::SignalData),
            protocol::MSG_INTERPRETATION => {
                Self::decode_interpretations(payload).map(Message::Interpretation)
            }
            protocol::MSG_DATA_QUALITY => Self::decode_data_quality(payload).map(Message::DataQuality),
            other => Ok(Message::Unknown {
                message_type: other,
                payload_len: payload.len(),
            }),
        }
    }

    /// Decode `(channel, count, samples...)` groups
    fn decode_signal_data(payload: &[u8]) -> Result<Vec<SignalBlock>> {
        let mut cur = PayloadCursor::new(payload, SIGNAL_DATA);

        cur.need(protocol::SIGNAL_DATA_PREAMBLE, "preamble")?;
        let signal_count = cur.u16()?;
        let _reserved = cur.u16()?;

        let mut blocks = Vec::with_capacity(usize::from(signal_count));
        for index in 0..signal_count {
            cur.need(protocol::SIGNAL_GROUP_HEADER, "group header")?;
            let channel = cur.u16()?;
            let value_count = usize::from(cur.u16()?);

            let needed = value_count * protocol::SAMPLE_WIDTH;
            if cur.remaining() < needed {
                return Err(StreamError::malformed(
                    SIGNAL_DATA,
                    format!(
                        "group {} (channel {}) declares {} samples ({} bytes) but only {} bytes remain",
                        index,
                        channel,
                        value_count,
                        needed,
                        cur.remaining()
                    ),
                ));
            }

            let mut values = Vec::with_capacity(value_count);
            let mut sample = [0u8; protocol::SAMPLE_WIDTH];
            for _ in 0..value_count {
                cur.bytes(&mut sample)?;
                values.push(protocol::decode_sample(sample));
            }

            blocks.push(SignalBlock { channel, values });
        }

        if cur.remaining() > 0 {
            log::debug!(
                "Ignoring {} trailing bytes after {} signal groups",
                cur.remaining(),
                signal_count
            );
        }

        Ok(blocks)
    }

    /// Decode `(channel, descriptor, value)` tuples until the payload ends
    fn decode_interpretations(payload: &[u8]) -> Result<Vec<Interpretation>> {
        let mut cur = PayloadCursor::new(payload, INTERPRETATION);
        let mut interpretations = Vec::new();

        while cur.remaining() > 0 {
            cur.need(protocol::INTERPRETATION_TUPLE_HEADER, "tuple header")?;
            let channel = cur.u16()?;
            let descriptor = DescriptorType::from_wire(cur.u16()?);
            let _reserved = cur.i16()?;
            let value_length = usize::from(cur.u16()?);

            cur.need(value_length, "descriptor value")?;
            let mut raw = vec![0u8; value_length];
            cur.bytes(&mut raw)?;

            // The final tuple may omit its padding
            let padding = protocol::padding_after(cur.position()).min(cur.remaining());
            cur.skip(padding)?;

            let value = Self::descriptor_value(descriptor, raw);
            interpretations.push(Interpretation {
                channel,
                descriptor,
                value,
            });
        }

        Ok(interpretations)
    }

    /// Interpret a descriptor's value bytes where the layout is known
    fn descriptor_value(descriptor: DescriptorType, raw: Vec<u8>) -> DescriptorValue {
        match descriptor {
            DescriptorType::ScaleFactor | DescriptorType::Offset
                if raw.len() == protocol::FLOAT_VALUE_WIDTH =>
            {
                let mut cur = Cursor::new(raw.as_slice());
                match cur.read_f64::<LittleEndian>() {
                    Ok(v) => DescriptorValue::Float(v),
                    Err(_) => DescriptorValue::Bytes(raw),
                }
            }
            DescriptorType::DataType | DescriptorType::VectorLength | DescriptorType::ChannelType
                if raw.len() == protocol::CODE_VALUE_WIDTH =>
            {
                DescriptorValue::Code(u16::from_le_bytes([raw[0], raw[1]]))
            }
            DescriptorType::ScaleFactor => {
                log::warn!(
                    "Scale factor descriptor with unexpected width {} (expected {})",
                    raw.len(),
                    protocol::FLOAT_VALUE_WIDTH
                );
                DescriptorValue::Bytes(raw)
            }
            _ => DescriptorValue::Bytes(raw),
        }
    }

    /// Decode `(channel, flags, reserved)` tuples
    fn decode_data_quality(payload: &[u8]) -> Result<Vec<QualityReport>> {
        let mut cur = PayloadCursor::new(payload, DATA_QUALITY);

        cur.need(protocol::DATA_QUALITY_PREAMBLE, "preamble")?;
        let signal_count = usize::from(cur.u16()?);

        let needed = signal_count * protocol::QUALITY_TUPLE;
        if cur.remaining() < needed {
            return Err(StreamError::malformed(
                DATA_QUALITY,
                format!(
                    "{} tuples need {} bytes but only {} remain",
                    signal_count,
                    needed,
                    cur.remaining()
                ),
            ));
        }

        let mut reports = Vec::with_capacity(signal_count);
        for _ in 0..signal_count {
            let channel = cur.u16()?;
            let flags = ValidityFlags(cur.u16()?);
            let _reserved = cur.u16()?;
            reports.push(QualityReport { channel, flags });
        }

        Ok(reports)
    }
}

/// Bounds-checked little-endian reads over a payload
///
/// Every short read is reported as `MalformedPayload` rather than an I/O
/// error: the bytes are already in memory, so running out means the frame
/// lied about its contents.
struct PayloadCursor<'a> {
    inner: Cursor<&'a [u8]>,
    message: &'static str,
}

impl<'a> PayloadCursor<'a> {
    fn new(payload: &'a [u8], message: &'static str) -> Self {
        Self {
            inner: Cursor::new(payload),
            message,
        }
    }

    fn position(&self) -> usize {
        self.inner.position() as usize
    }

    fn remaining(&self) -> usize {
        self.inner.get_ref().len().saturating_sub(self.position())
    }

    fn need(&self, len: usize, what: &str) -> Result<()> {
        if self.remaining() < len {
            return Err(StreamError::malformed(
                self.message,
                format!(
                    "{} needs {} bytes at offset {} but only {} remain",
                    what,
                    len,
                    self.position(),
                    self.remaining()
                ),
            ));
        }
        Ok(())
    }

    fn u16(&mut self) -> Result<u16> {
        self.need(2, "u16 field")?;
        self.inner
            .read_u16::<LittleEndian>()
            .map_err(|e| StreamError::malformed(self.message, e.to_string()))
    }

    fn i16(&mut self) -> Result<i16> {
        self.need(2, "i16 field")?;
        self.inner
            .read_i16::<LittleEndian>()
            .map_err(|e| StreamError::malformed(self.message, e.to_string()))
    }

    fn bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.need(buf.len(), "byte field")?;
        self.inner
            .read_exact(buf)
            .map_err(|e| StreamError::malformed(self.message, e.to_string()))
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.need(len, "padding")?;
        self.inner.set_position((self.position() + len) as u64);
        Ok(())
    }
}
