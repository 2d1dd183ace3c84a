//! Frame codec: text frames and hybrid JSON + binary frames.
//!
//! A hybrid frame is `<JSON><0x00><payload>`. Valid JSON never contains a raw
//! NUL byte, so the first NUL always marks the end of the header.

use crate::error::InboundError;
use crate::message::Envelope;

/// Separator between the JSON header and the binary payload.
pub const SEPARATOR: u8 = 0x00;

/// Encode an envelope as a UTF-8 JSON text frame.
pub fn encode_text(envelope: &Envelope) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(envelope)
}

/// Encode an envelope followed by a NUL separator and `payload`.
///
/// The separator is always written; payload bytes only when non-empty.
pub fn encode_hybrid(envelope: &Envelope, payload: &[u8]) -> Result<Vec<u8>, serde_json::Error> {
    let mut frame = serde_json::to_vec(envelope)?;
    frame.reserve(1 + payload.len());
    frame.push(SEPARATOR);
    if !payload.is_empty() {
        frame.extend_from_slice(payload);
    }
    Ok(frame)
}

/// Split a frame into its JSON header and the bytes after the first NUL.
pub fn split_frame(frame: &[u8]) -> (&[u8], Option<&[u8]>) {
    match frame.iter().position(|&b| b == SEPARATOR) {
        Some(pos) => (&frame[..pos], Some(&frame[pos + 1..])),
        None => (frame, None),
    }
}

/// Parse the JSON header of an inbound frame. The header must be an object.
pub fn decode_header(frame: &[u8]) -> Result<serde_json::Value, InboundError> {
    let (header, _) = split_frame(frame);
    let value: serde_json::Value =
        serde_json::from_slice(header).map_err(|e| InboundError::MalformedJson(e.to_string()))?;
    if !value.is_object() {
        return Err(InboundError::MalformedJson("frame is not a JSON object".to_string()));
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
