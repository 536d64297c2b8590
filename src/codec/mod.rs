//! Media codecs
//!
//! PCM16 conversion for audio, base64 transport text for framing binary
//! payloads into JSON messages, and JPEG for camera snapshots.

pub mod decoder;
pub mod encoder;
pub mod jpeg;
pub mod pcm;
pub mod text;

pub use decoder::Pcm16Decoder;
pub use encoder::Pcm16Encoder;
pub use jpeg::encode_jpeg;
pub use pcm::{decode_pcm16, encode_pcm16};
pub use text::{buffer_to_transport_text, transport_text_to_buffer};
