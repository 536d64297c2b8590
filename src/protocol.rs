//! Wire protocol for the remote agent service
//!
//! Outbound frames are JSON objects with a single top-level key
//! (`setup`, `realtimeInput`, `clientContent`). Inbound frames carry
//! `setupComplete`, `serverContent` or `goAway`. Binary payloads travel
//! as base64 transport text inside `data` fields.

use serde::{Deserialize, Serialize};

use crate::codec::text::buffer_to_transport_text;
use crate::error::CodecError;

/// Media type tag; determines the decoding path on the remote end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// Mono PCM16 little-endian at a declared rate
    Audio { sample_rate: u32 },
    /// JPEG still image
    Jpeg,
}

impl MediaKind {
    pub fn mime_type(&self) -> String {
        match self {
            MediaKind::Audio { sample_rate } => format!("audio/pcm;rate={}", sample_rate),
            MediaKind::Jpeg => "image/jpeg".to_string(),
        }
    }
}

/// A transport-safe encoded media payload plus its type tag.
///
/// The payload is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMediaPacket {
    kind: MediaKind,
    data: String,
}

impl EncodedMediaPacket {
    pub fn new(kind: MediaKind, data: String) -> Result<Self, CodecError> {
        if data.is_empty() {
            return Err(CodecError::EmptyPayload);
        }
        Ok(Self { kind, data })
    }

    /// Wrap raw JPEG bytes
    pub fn jpeg(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::new(MediaKind::Jpeg, buffer_to_transport_text(bytes))
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn is_audio(&self) -> bool {
        matches!(self.kind, MediaKind::Audio { .. })
    }

    /// Transport text payload
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn mime_type(&self) -> String {
        self.kind.mime_type()
    }

    pub fn into_blob(self) -> Blob {
        Blob {
            mime_type: self.kind.mime_type(),
            data: self.data,
        }
    }
}

/// `{data, mimeType}` pair used both ways on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    #[serde(default)]
    pub mime_type: String,
    pub data: String,
}

impl Blob {
    /// Inline data without a mime type is treated as audio
    pub fn is_audio(&self) -> bool {
        self.mime_type.is_empty() || self.mime_type.starts_with("audio/")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(role: Option<&str>, text: impl Into<String>) -> Self {
        Self {
            role: role.map(str::to_string),
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

// =============================================================================
// Outbound
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

/// One-time session registration sent right after the transport opens
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

impl Setup {
    /// Audio-out setup with a prebuilt voice and optional persona text
    pub fn audio(model: &str, voice: &str, system_instruction: Option<&str>) -> Self {
        Self {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                }),
            },
            system_instruction: system_instruction
                .filter(|s| !s.trim().is_empty())
                .map(|s| Content::text(None, s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

/// Messages sent to the remote service
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
    ClientContent(ClientContent),
}

impl ClientMessage {
    /// Realtime media frame (audio window or video snapshot)
    pub fn media(packet: EncodedMediaPacket) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![packet.into_blob()],
        })
    }

    /// Complete user text turn
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content::text(Some("user"), text)],
            turn_complete: true,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Inbound
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// Messages received from the remote service
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    pub fn is_interrupted(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.interrupted)
    }

    pub fn is_turn_complete(&self) -> bool {
        self.server_content.as_ref().is_some_and(|c| c.turn_complete)
    }

    /// Audio payloads of the model turn, in part order
    pub fn audio_payloads(&self) -> impl Iterator<Item = &str> {
        self.server_content
            .iter()
            .filter_map(|c| c.model_turn.as_ref())
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .filter(|blob| blob.is_audio() && !blob.data.is_empty())
            .map(|blob| blob.data.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_media_message_shape() {
        let packet = EncodedMediaPacket::new(
            MediaKind::Audio { sample_rate: 16000 },
            "AAAA".to_string(),
        )
        .unwrap();

        let value = serde_json::to_value(ClientMessage::media(packet)).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm;rate=16000", "data": "AAAA"}]}})
        );
    }

    #[test]
    fn test_jpeg_packet() {
        let packet = EncodedMediaPacket::jpeg(&[0xFF, 0xD8]).unwrap();
        assert_eq!(packet.mime_type(), "image/jpeg");
        assert!(!packet.is_audio());
        assert!(EncodedMediaPacket::jpeg(&[]).is_err());
    }

    #[test]
    fn test_setup_shape() {
        let setup = Setup::audio("models/test", "Zephyr", Some("Be calm."));
        let value = serde_json::to_value(ClientMessage::Setup(setup)).unwrap();

        assert_eq!(value["setup"]["model"], "models/test");
        assert_eq!(
            value["setup"]["generationConfig"]["responseModalities"],
            json!(["AUDIO"])
        );
        assert_eq!(
            value["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Zephyr"
        );
        assert_eq!(value["setup"]["systemInstruction"]["parts"][0]["text"], "Be calm.");
    }

    #[test]
    fn test_blank_instruction_omitted() {
        let setup = Setup::audio("models/test", "Zephyr", Some("  "));
        assert!(setup.system_instruction.is_none());
    }

    #[test]
    fn test_user_text_shape() {
        let value = serde_json::to_value(ClientMessage::user_text("hello")).unwrap();
        assert_eq!(
            value,
            json!({"clientContent": {"turns": [{"role": "user", "parts": [{"text": "hello"}]}], "turnComplete": true}})
        );
    }

    #[test]
    fn test_parse_audio_turn() {
        let msg = ServerMessage::from_json(
            r#"{"serverContent":{"modelTurn":{"parts":[
                {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}},
                {"text":"thinking"},
                {"inlineData":{"data":"BBBB"}}
            ]}},"usageMetadata":{"totalTokenCount":3}}"#,
        )
        .unwrap();

        let payloads: Vec<&str> = msg.audio_payloads().collect();
        assert_eq!(payloads, vec!["AAAA", "BBBB"]);
        assert!(!msg.is_interrupted());
    }

    #[test]
    fn test_parse_control_flags() {
        let msg = ServerMessage::from_json(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        assert!(msg.is_interrupted());
        assert_eq!(msg.audio_payloads().count(), 0);

        let msg = ServerMessage::from_json(r#"{"serverContent":{"turnComplete":true}}"#).unwrap();
        assert!(msg.is_turn_complete());

        let msg = ServerMessage::from_slice(br#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.is_setup_complete());
    }
}
