//! Transport-safe text encoding of binary payloads (standard base64)

use base64::prelude::*;

use crate::error::CodecError;

/// Encode bytes for a text-based transport frame.
pub fn buffer_to_transport_text(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decode a text payload back into bytes.
pub fn transport_text_to_buffer(text: &str) -> Result<Vec<u8>, CodecError> {
    BASE64_STANDARD
        .decode(text)
        .map_err(|e| CodecError::MalformedInput(format!("invalid transport text: {}", e)))
}
