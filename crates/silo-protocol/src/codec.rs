use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{Message, MAX_MESSAGE_SIZE};

/// Encode a message with framing: `[4 bytes len][1 byte tag][payload]`.
///
/// The length covers the tag byte and the payload.
pub fn encode<M: Message>(msg: &M) -> ProtocolResult<Vec<u8>> {
    let payload =
        bincode::serialize(msg).map_err(|e| ProtocolError::Serialization(e.to_string()))?;
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: payload.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let len = (payload.len() + 1) as u32;
    let mut buf = Vec::with_capacity(4 + 1 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.push(msg.type_tag());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a frame body (the tag byte already stripped off).
///
/// The decoded message's own tag must agree with the frame tag; a frame
/// carrying a tag outside the closed registry, or a tag that contradicts its
/// payload, is a hard error, never silently ignored.
pub fn decode_body<M: Message>(tag: u8, payload: &[u8]) -> ProtocolResult<M> {
    let msg: M = bincode::deserialize(payload)
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    if msg.type_tag() != tag {
        return Err(ProtocolError::UnknownKind {
            tag,
            decoded: msg.type_tag(),
        });
    }
    Ok(msg)
}

/// Decode a full framed message. Returns (message, bytes consumed).
pub fn decode<M: Message>(data: &[u8]) -> ProtocolResult<(M, usize)> {
    if data.len() < 5 {
        return Err(ProtocolError::FramingError("too short".into()));
    }
    let len = u32::from_be_bytes(data[0..4].try_into().unwrap()) as usize;
    if len < 1 {
        return Err(ProtocolError::FramingError("zero-length frame".into()));
    }
    if len - 1 > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len - 1,
            max: MAX_MESSAGE_SIZE,
        });
    }
    let total = 4 + len;
    if data.len() < total {
        return Err(ProtocolError::FramingError(format!(
            "incomplete: have {}, need {}",
            data.len(),
            total
        )));
    }
    let msg = decode_body(data[4], &data[5..total])?;
    Ok((msg, total))
}
