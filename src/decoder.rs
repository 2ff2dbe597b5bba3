//! Schema-driven packet decoder.
//!
//! A frame is laid out as:
//!
//! | start | id | numbytes | payload | checksum (BE u16) | end |
//! |-------|----|----------|---------|-------------------|-----|
//! | 0x01  | 1  | 1        | n       | 2                 | 0x05 |
//!
//! The checksum is `(numbytes + sum(payload)) mod 65536`. Decoding is a pure
//! function of the frame bytes and the registry, so frames may be decoded in any
//! order or in parallel.

use crate::error::FrameRejection;
use crate::scanner::{END_MARKER, START_MARKER};
use crate::schema::{SchemaRegistry, FRAME_OVERHEAD, ID_COLUMN};
use byteorder::{BigEndian, ByteOrder};

/// A successfully decoded packet.
///
/// Column names borrow from the registry the frame was decoded against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord<'r> {
    pub packet_id: u8,
    /// Column/value pairs in extraction order, starting with `ID`.
    pub values: Vec<(&'r str, u64)>,
}

impl<'r> DecodedRecord<'r> {
    /// Looks up a decoded value by column name.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.values
            .iter()
            .find(|(column, _)| *column == name)
            .map(|&(_, value)| value)
    }
}

/// Computes the 16-bit frame checksum.
pub fn checksum(num_bytes: u8, payload: &[u8]) -> u16 {
    let sum = payload
        .iter()
        .fold(num_bytes as u32, |acc, &b| acc.wrapping_add(b as u32));
    (sum % 65536) as u16
}

/// Validates a candidate frame and extracts its fields.
pub fn decode<'r>(
    frame: &[u8],
    registry: &'r SchemaRegistry,
) -> Result<DecodedRecord<'r>, FrameRejection> {
    if frame.len() < FRAME_OVERHEAD {
        return Err(FrameRejection::TooShort {
            len: frame.len(),
            min: FRAME_OVERHEAD,
        });
    }
    if frame[0] != START_MARKER {
        return Err(FrameRejection::BadStartMarker { got: frame[0] });
    }
    let last = frame[frame.len() - 1];
    if last != END_MARKER {
        return Err(FrameRejection::BadEndMarker { got: last });
    }

    let id = frame[1];
    let num_bytes = frame[2];
    let schema = registry
        .get(id)
        .ok_or(FrameRejection::UnknownId { id })?;

    if let Some(expected) = schema.length {
        if frame.len() != expected {
            return Err(FrameRejection::LengthMismatch {
                id,
                got: frame.len(),
                expected,
            });
        }
    }
    if let Some(expected) = schema.num_bytes {
        if num_bytes != expected {
            return Err(FrameRejection::NumBytesMismatch {
                id,
                got: num_bytes,
                expected,
            });
        }
    }

    let checksum_pos = frame.len() - 3;
    let payload = &frame[3..checksum_pos];
    let got = BigEndian::read_u16(&frame[checksum_pos..checksum_pos + 2]);
    let computed = checksum(num_bytes, payload);
    if got != computed {
        return Err(FrameRejection::ChecksumMismatch { id, got, computed });
    }

    let mut values = Vec::with_capacity(1 + schema.fields.len());
    values.push((ID_COLUMN, id as u64));

    let mut offset = 0;
    for field in &schema.fields {
        let end = offset + field.size;
        if end > payload.len() {
            return Err(FrameRejection::PayloadTooShort {
                id,
                field: field.name.clone(),
                needed: end,
                available: payload.len(),
            });
        }

        let value = BigEndian::read_uint(&payload[offset..end], field.size);
        values.push((field.name.as_str(), value));

        if field.size == 1 {
            let byte = payload[offset];
            for (i, bit_name) in field.bits.iter().enumerate() {
                values.push((bit_name.as_str(), field.bit_order.bit(byte, i) as u64));
            }
        }

        offset = end;
    }

    Ok(DecodedRecord {
        packet_id: id,
        values,
    })
}
