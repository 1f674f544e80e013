//! Codec for encoding and decoding presence channel frames.
//!
//! Frames are JSON text. Binary websocket messages are accepted on the
//! inbound side as long as they hold UTF-8 JSON.

use thiserror::Error;

use crate::frames::{Frame, InboundMessage};

/// Maximum frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary frame was not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

/// Encode a frame to JSON text.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(frame)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode an inbound frame from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large, is not a JSON object, or
/// has no string `type` field.
pub fn decode(text: &str) -> Result<InboundMessage, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(serde_json::from_str(text)?)
}

/// Decode an inbound frame from a binary message.
///
/// # Errors
///
/// Returns an error if the data is not UTF-8 or fails [`decode`].
pub fn decode_bytes(data: &[u8]) -> Result<InboundMessage, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    decode(std::str::from_utf8(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::ActivityStatus;
    use serde_json::json;

    #[test]
    fn test_encode_user_status() {
        let text = encode(&Frame::user_status(ActivityStatus::Offline)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "user_status", "status": "offline"}));
    }

    #[test]
    fn test_decode_keeps_unknown_fields() {
        let msg = decode(r#"{"type":"reward","points":10,"meta":{"badge":"gold"}}"#).unwrap();
        assert_eq!(msg.kind(), "reward");
        assert_eq!(msg.get("points"), Some(&json!(10)));
        assert_eq!(msg.get("meta"), Some(&json!({"badge": "gold"})));
        assert!(msg.get("type").is_none());
    }

    #[test]
    fn test_decode_malformed() {
        match decode("{not json") {
            Err(ProtocolError::Json(_)) => {}
            other => panic!("Expected Json error, got {:?}", other),
        }

        // Valid JSON, but no discriminator.
        assert!(decode(r#"{"status":"online"}"#).is_err());
        assert!(decode("[1,2,3]").is_err());
    }

    #[test]
    fn test_decode_bytes() {
        let msg = decode_bytes(br#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg.kind(), "ping");

        match decode_bytes(&[0xff, 0xfe]) {
            Err(ProtocolError::Utf8(_)) => {}
            other => panic!("Expected Utf8 error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let text = format!(r#"{{"type":"blob","data":"{}"}}"#, "a".repeat(MAX_FRAME_SIZE));
        match decode(&text) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }
}
