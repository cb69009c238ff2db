//! Registry wire framing.
//!
//! Encoded payloads are prefixed with a five byte header: one reserved
//! magic byte (zero) followed by the schema ID as a big-endian u32. The
//! layout is a fixed interoperability contract with downstream consumers
//! and must be reproduced byte for byte.

use crate::error::SchemaFlowError;
use bytes::{BufMut, Bytes, BytesMut};

pub const WIRE_HEADER_LEN: usize = 5;

const MAGIC_BYTE: u8 = 0;

/// Frames a schema-encoded payload with its schema ID.
pub fn frame(schema_id: u32, payload: &[u8]) -> Bytes {
    let mut framed = BytesMut::with_capacity(WIRE_HEADER_LEN + payload.len());
    framed.put_u8(MAGIC_BYTE);
    framed.put_u32(schema_id);
    framed.put_slice(payload);
    framed.freeze()
}

/// Mirror of [`frame`]: splits framed bytes back into the schema ID and
/// the encoded payload.
pub fn unframe(data: &[u8]) -> crate::Result<(u32, &[u8])> {
    if data.len() < WIRE_HEADER_LEN {
        return Err(SchemaFlowError::WireFormat(format!(
            "framed message too short: {} bytes",
            data.len()
        )));
    }
    if data[0] != MAGIC_BYTE {
        return Err(SchemaFlowError::WireFormat(format!(
            "unexpected magic byte {:#04x}",
            data[0]
        )));
    }
    let schema_id = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    Ok((schema_id, &data[WIRE_HEADER_LEN..]))
}
