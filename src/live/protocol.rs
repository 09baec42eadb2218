//! Wire messages exchanged with the live speech service.
//!
//! Outbound messages are externally tagged (`{"setup": {...}}`,
//! `{"realtimeInput": {...}}`). Inbound messages carry optional sections that
//! may appear in any combination.

use crate::audio::codec::WireBlob;
use crate::config::LiveConfig;
use serde::{Deserialize, Serialize};

/// Messages sent to the speech service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(SetupPayload),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    /// Wrap an encoded capture frame.
    pub fn audio(blob: WireBlob) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput { media: blob })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeInput {
    pub media: WireBlob,
}

/// Session configuration sent once right after connecting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    pub input_audio_transcription: Empty,
    pub output_audio_transcription: Empty,
}

impl SetupPayload {
    pub fn new(live: &LiveConfig, instruction: impl Into<String>) -> Self {
        Self {
            model: live.model.clone(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: live.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![TextPart {
                    text: instruction.into(),
                }],
            },
            input_audio_transcription: Empty {},
            output_audio_transcription: Empty {},
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

/// Serializes as `{}`; presence alone turns a feature on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Empty {}

/// Any message received from the speech service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
}

impl ServerMessage {
    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub input_transcription: Option<Transcription>,
    #[serde(default)]
    pub output_transcription: Option<Transcription>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

impl ServerContent {
    /// Base64 payloads of every inline audio part, in order.
    pub fn inline_audio(&self) -> impl Iterator<Item = &str> {
        self.model_turn
            .iter()
            .flat_map(|turn| turn.parts.iter())
            .filter_map(|part| part.inline_data.as_ref())
            .map(|blob| blob.data.as_str())
    }

    pub fn input_text(&self) -> Option<&str> {
        self.input_transcription.as_ref().and_then(|t| t.text.as_deref())
    }

    pub fn output_text(&self) -> Option<&str> {
        self.output_transcription.as_ref().and_then(|t| t.text.as_deref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default)]
    pub inline_data: Option<InlineData>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_realtime_input_shape() {
        let message = ClientMessage::audio(WireBlob {
            data: "AAA=".to_string(),
            mime_type: "audio/pcm;rate=16000".to_string(),
        });
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"media": {"data": "AAA=", "mimeType": "audio/pcm;rate=16000"}}})
        );
    }

    #[test]
    fn test_setup_shape() {
        let live = crate::config::AppConfig::default().live;
        let message = ClientMessage::Setup(SetupPayload::new(&live, "Eres Azumi"));
        let value = serde_json::to_value(&message).unwrap();

        let setup = &value["setup"];
        assert_eq!(setup["model"], json!(live.model));
        assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            json!("Kore")
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], json!("Eres Azumi"));
        assert_eq!(setup["inputAudioTranscription"], json!({}));
        assert_eq!(setup["outputAudioTranscription"], json!({}));
    }

    #[test]
    fn test_parse_setup_complete() {
        let message: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(message.is_setup_complete());
        assert!(message.server_content.is_none());
    }

    #[test]
    fn test_parse_full_server_content() {
        let raw = r#"{
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAAA"}},
                    {"text": "ignored"},
                    {"inlineData": {"data": "BBBB"}}
                ]},
                "inputTranscription": {"text": "hola"},
                "outputTranscription": {"text": "konnichiwa"},
                "interrupted": true
            }
        }"#;
        let message: ServerMessage = serde_json::from_str(raw).unwrap();
        let content = message.server_content.unwrap();

        assert_eq!(content.inline_audio().collect::<Vec<_>>(), vec!["AAAA", "BBBB"]);
        assert_eq!(content.input_text(), Some("hola"));
        assert_eq!(content.output_text(), Some("konnichiwa"));
        assert!(content.interrupted);
        assert!(!content.turn_complete);
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let raw = r#"{"serverContent":{"turnComplete":true,"generationComplete":true},"usageMetadata":{}}"#;
        let message: ServerMessage = serde_json::from_str(raw).unwrap();
        let content = message.server_content.unwrap();
        assert!(content.turn_complete);
        assert_eq!(content.inline_audio().count(), 0);
        assert_eq!(content.output_text(), None);
    }
}
