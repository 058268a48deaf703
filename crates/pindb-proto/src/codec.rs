use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, ProtocolResult};
use crate::stream::{WireStream, MAX_SEGMENT_SIZE};

/// Codec for framing wire segments.
///
/// Each segment is framed as `[4 bytes len][payload]`; a message is a plain
/// concatenation of framed segments, and a response chunk is exactly one
/// framed segment.
pub struct SegmentCodec;

impl SegmentCodec {
    /// Frame one segment: `[4 bytes len][payload]`.
    pub fn encode(stream: &WireStream) -> ProtocolResult<Bytes> {
        let payload = bincode::serialize(stream)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        if payload.len() > MAX_SEGMENT_SIZE {
            return Err(ProtocolError::SegmentTooLarge {
                size: payload.len(),
                max: MAX_SEGMENT_SIZE,
            });
        }
        let mut buf = BytesMut::with_capacity(4 + payload.len());
        buf.put_u32(payload.len() as u32);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode one framed segment. Returns `(segment, bytes_consumed)`.
    pub fn decode(data: &[u8]) -> ProtocolResult<(WireStream, usize)> {
        if data.len() < 4 {
            return Err(ProtocolError::FramingError("too short".into()));
        }
        let len = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
        if len > MAX_SEGMENT_SIZE {
            return Err(ProtocolError::SegmentTooLarge { size: len, max: MAX_SEGMENT_SIZE });
        }
        let total = 4 + len;
        if data.len() < total {
            return Err(ProtocolError::FramingError(format!(
                "incomplete: have {}, need {}",
                data.len(),
                total
            )));
        }
        let stream: WireStream = bincode::deserialize(&data[4..total])
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok((stream, total))
    }

    /// Decode a whole message: a concatenation of framed segments.
    pub fn decode_message(data: &[u8]) -> ProtocolResult<Vec<WireStream>> {
        let mut segments = Vec::new();
        let mut rest = data;
        while !rest.is_empty() {
            let (segment, consumed) = Self::decode(rest)?;
            segments.push(segment);
            rest = &rest[consumed..];
        }
        Ok(segments)
    }

    /// Decode a response: exactly one framed segment; trailing bytes are a
    /// framing error.
    pub fn decode_response(data: &[u8]) -> ProtocolResult<WireStream> {
        let (stream, consumed) = Self::decode(data)?;
        if consumed != data.len() {
            return Err(ProtocolError::FramingError(format!(
                "{} trailing bytes after response segment",
                data.len() - consumed
            )));
        }
        Ok(stream)
    }

    /// Total framed length of the chunk starting at `prefix`, once the
    /// 4-byte length prefix is available. Used by transports to know when a
    /// full chunk has arrived.
    pub fn chunk_len(prefix: &[u8]) -> Option<usize> {
        if prefix.len() < 4 {
            return None;
        }
        let len = u32::from_be_bytes(prefix[0..4].try_into().unwrap()) as usize;
        Some(4 + len)
    }
}
