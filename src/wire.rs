//! Wire codec for the Gemini Live protocol (BidiGenerateContent).
//!
//! Pure message builders and a parser; no state, no I/O. Field-name case
//! is part of the protocol and deliberately inconsistent: the `setup` and
//! `toolResponse` subtrees are camelCase, `client_content` and the
//! `realtime_input` payload fields are snake_case, and the activity
//! markers inside `realtime_input` are camelCase again. The serde renames
//! below are the single source of truth for that split.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::chunk::ToolResponse;
use crate::config::{EndSensitivity, Modality, SessionConfig, VadPolicy, VadSensitivity};
use crate::error::Error;

/// MIME type for outbound PCM media chunks.
pub const INPUT_AUDIO_MIME: &str = "audio/pcm";

/// Voice used for AUDIO sessions when the config names none.
const DEFAULT_VOICE: &str = "Aoede";

// ── Setup (client → server, first frame) ───────────────────────────

/// Top-level setup message; sent once per connection, cached verbatim on
/// the session for re-send after reconnect.
#[derive(Debug, Clone, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupPayload {
    pub model: String,
    #[serde(rename = "generationConfig")]
    pub generation_config: GenerationConfig,
    #[serde(rename = "speechConfig", skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
    #[serde(
        rename = "inputAudioTranscription",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_audio_transcription: Option<TranscriptionConfig>,
    #[serde(
        rename = "outputAudioTranscription",
        skip_serializing_if = "Option::is_none"
    )]
    pub output_audio_transcription: Option<TranscriptionConfig>,
    #[serde(
        rename = "realtimeInputConfig",
        skip_serializing_if = "Option::is_none"
    )]
    pub realtime_input_config: Option<RealtimeInputConfig>,
    #[serde(
        rename = "systemInstruction",
        skip_serializing_if = "Option::is_none"
    )]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDeclarations>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationConfig {
    #[serde(rename = "responseModalities")]
    pub response_modalities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpeechConfig {
    #[serde(rename = "voiceConfig")]
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceConfig {
    #[serde(rename = "prebuiltVoiceConfig")]
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrebuiltVoiceConfig {
    #[serde(rename = "voiceName")]
    pub voice_name: String,
}

/// Empty marker object requesting a transcription stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TranscriptionConfig {}

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInputConfig {
    #[serde(rename = "automaticActivityDetection")]
    pub automatic_activity_detection: AutomaticActivityDetection,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutomaticActivityDetection {
    pub disabled: bool,
    #[serde(
        rename = "startOfSpeechSensitivity",
        skip_serializing_if = "Option::is_none"
    )]
    pub start_of_speech_sensitivity: Option<VadSensitivity>,
    #[serde(
        rename = "endOfSpeechSensitivity",
        skip_serializing_if = "Option::is_none"
    )]
    pub end_of_speech_sensitivity: Option<EndSensitivity>,
    #[serde(rename = "prefixPaddingMs", skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    #[serde(rename = "silenceDurationMs", skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDeclarations {
    #[serde(rename = "functionDeclarations")]
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Derive the setup message from a config snapshot.
pub fn build_setup_message(config: &SessionConfig) -> SetupMessage {
    let audio = config.modality() == Modality::Audio;

    let speech_config = audio.then(|| SpeechConfig {
        voice_config: VoiceConfig {
            prebuilt_voice_config: PrebuiltVoiceConfig {
                voice_name: config
                    .voice
                    .clone()
                    .unwrap_or_else(|| DEFAULT_VOICE.to_string()),
            },
        },
    });

    let realtime_input_config = match &config.vad {
        VadPolicy::ServerDefault => None,
        VadPolicy::Automatic(tuning) => Some(RealtimeInputConfig {
            automatic_activity_detection: AutomaticActivityDetection {
                disabled: false,
                start_of_speech_sensitivity: Some(tuning.start_sensitivity),
                end_of_speech_sensitivity: Some(tuning.end_sensitivity),
                prefix_padding_ms: Some(tuning.prefix_padding_ms),
                silence_duration_ms: Some(tuning.silence_duration_ms),
            },
        }),
        VadPolicy::Disabled => Some(RealtimeInputConfig {
            automatic_activity_detection: AutomaticActivityDetection {
                disabled: true,
                start_of_speech_sensitivity: None,
                end_of_speech_sensitivity: None,
                prefix_padding_ms: None,
                silence_duration_ms: None,
            },
        }),
    };

    let system_instruction = config
        .system_instruction
        .as_ref()
        .filter(|text| !text.is_empty())
        .map(|text| SystemInstruction {
            parts: vec![TextPart { text: text.clone() }],
        });

    let tools = (!config.tools.is_empty()).then(|| {
        vec![ToolDeclarations {
            function_declarations: config
                .tools
                .iter()
                .map(|tool| FunctionDeclaration {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                })
                .collect(),
        }]
    });

    SetupMessage {
        setup: SetupPayload {
            model: config.resolved_model(),
            generation_config: GenerationConfig {
                response_modalities: vec![config.modality().as_str().to_string()],
            },
            speech_config,
            input_audio_transcription: audio.then(TranscriptionConfig::default),
            output_audio_transcription: audio.then(TranscriptionConfig::default),
            realtime_input_config,
            system_instruction,
            tools,
        },
    }
}

// ── Client content (client → server) ───────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientContentMessage {
    pub client_content: ClientContent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turns: Option<Vec<Turn>>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub parts: Vec<TextPart>,
}

/// A user text turn; `turn_complete` decides whether the model may
/// start responding.
pub fn build_text_message(text: &str, turn_complete: bool) -> ClientContentMessage {
    ClientContentMessage {
        client_content: ClientContent {
            turns: Some(vec![Turn {
                role: "user".to_string(),
                parts: vec![TextPart {
                    text: text.to_string(),
                }],
            }]),
            turn_complete,
        },
    }
}

/// A lone turn-completion frame, closing the current user turn.
pub fn build_turn_complete_message() -> ClientContentMessage {
    ClientContentMessage {
        client_content: ClientContent {
            turns: None,
            turn_complete: true,
        },
    }
}

// ── Realtime input (client → server) ───────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RealtimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_chunks: Option<Vec<MediaChunk>>,
    #[serde(rename = "activityStart", skip_serializing_if = "Option::is_none")]
    pub activity_start: Option<ActivityMarker>,
    #[serde(rename = "activityEnd", skip_serializing_if = "Option::is_none")]
    pub activity_end: Option<ActivityMarker>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64-encoded PCM.
    pub data: String,
}

/// Empty marker object for activityStart/activityEnd.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActivityMarker {}

/// Wrap raw PCM bytes as a base64 media chunk message.
pub fn build_media_message(pcm: &[u8]) -> RealtimeInputMessage {
    let data = base64::engine::general_purpose::STANDARD.encode(pcm);
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: Some(vec![MediaChunk {
                mime_type: INPUT_AUDIO_MIME.to_string(),
                data,
            }]),
            ..Default::default()
        },
    }
}

pub fn build_activity_start() -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            activity_start: Some(ActivityMarker {}),
            ..Default::default()
        },
    }
}

pub fn build_activity_end() -> RealtimeInputMessage {
    RealtimeInputMessage {
        realtime_input: RealtimeInput {
            activity_end: Some(ActivityMarker {}),
            ..Default::default()
        },
    }
}

// ── Tool response (client → server) ────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponseMessage {
    #[serde(rename = "toolResponse")]
    pub tool_response: ToolResponsePayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResponsePayload {
    #[serde(rename = "functionResponses")]
    pub function_responses: Vec<FunctionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionResponse {
    pub id: String,
    pub response: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
}

/// Coerce a tool result string to the wire payload: valid JSON passes
/// through, anything else is wrapped as `{"result": <string>}`.
pub fn tool_result_response(result: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(result) {
        Ok(value) => value,
        Err(_) => serde_json::json!({ "result": result }),
    }
}

pub fn build_tool_response_message(responses: &[ToolResponse]) -> ToolResponseMessage {
    ToolResponseMessage {
        tool_response: ToolResponsePayload {
            function_responses: responses
                .iter()
                .map(|r| FunctionResponse {
                    id: r.tool_call_id.clone(),
                    response: tool_result_response(&r.result),
                    error: r.is_error.then_some(true),
                })
                .collect(),
        },
    }
}

// ── Server messages (server → client) ──────────────────────────────

/// One decoded server frame. Exactly one logical payload is usually
/// present, but `usageMetadata` can ride along with `serverContent`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "setupComplete")]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(rename = "serverContent")]
    pub server_content: Option<ServerContent>,
    #[serde(rename = "toolCall")]
    pub tool_call: Option<ToolCallPayload>,
    #[serde(rename = "usageMetadata")]
    pub usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerContent {
    #[serde(rename = "modelTurn")]
    pub model_turn: Option<ModelTurn>,
    #[serde(rename = "turnComplete", default)]
    pub turn_complete: bool,
    #[serde(rename = "generationComplete", default)]
    pub generation_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(rename = "inputTranscription")]
    pub input_transcription: Option<Transcription>,
    #[serde(rename = "outputTranscription")]
    pub output_transcription: Option<Transcription>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<ServerPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerPart {
    pub text: Option<String>,
    #[serde(rename = "inlineData")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InlineData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Transcription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallPayload {
    #[serde(rename = "functionCalls", default)]
    pub function_calls: Vec<FunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    pub prompt_token_count: u64,
    #[serde(rename = "responseTokenCount", default)]
    pub response_token_count: u64,
    #[serde(rename = "totalTokenCount", default)]
    pub total_token_count: u64,
}

/// Parse a raw server frame (text or binary; the Live API sends JSON in
/// both) into a [`ServerMessage`].
pub fn parse_server_message(raw: &[u8]) -> Result<ServerMessage, Error> {
    serde_json::from_slice(raw).map_err(|e| Error::ProtocolParse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Modality, ToolDecl, VadPolicy, VadTuning};

    fn to_json<T: Serialize>(msg: &T) -> serde_json::Value {
        serde_json::to_value(msg).unwrap()
    }

    #[test]
    fn setup_message_text_minimal() {
        let config = SessionConfig::default();
        let json = to_json(&build_setup_message(&config));

        assert_eq!(
            json["setup"]["model"],
            format!("models/{}", crate::config::DEFAULT_LIVE_MODEL)
        );
        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "TEXT"
        );
        // TEXT sessions carry no audio subtrees and no VAD override.
        assert!(json["setup"].get("speechConfig").is_none());
        assert!(json["setup"].get("inputAudioTranscription").is_none());
        assert!(json["setup"].get("outputAudioTranscription").is_none());
        assert!(json["setup"].get("realtimeInputConfig").is_none());
        assert!(json["setup"].get("systemInstruction").is_none());
        assert!(json["setup"].get("tools").is_none());
    }

    #[test]
    fn setup_message_audio_carries_speech_and_transcription() {
        let config = SessionConfig {
            modalities: vec![Modality::Audio],
            ..Default::default()
        };
        let json = to_json(&build_setup_message(&config));

        assert_eq!(
            json["setup"]["generationConfig"]["responseModalities"][0],
            "AUDIO"
        );
        assert_eq!(
            json["setup"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
        assert!(json["setup"]["inputAudioTranscription"].is_object());
        assert!(json["setup"]["outputAudioTranscription"].is_object());
    }

    #[test]
    fn setup_message_vad_tuning() {
        let config = SessionConfig {
            vad: VadPolicy::Automatic(VadTuning::default()),
            ..Default::default()
        };
        let json = to_json(&build_setup_message(&config));
        let vad = &json["setup"]["realtimeInputConfig"]["automaticActivityDetection"];

        assert_eq!(vad["disabled"], false);
        assert_eq!(vad["startOfSpeechSensitivity"], "START_SENSITIVITY_LOW");
        assert_eq!(vad["endOfSpeechSensitivity"], "END_SENSITIVITY_LOW");
        assert_eq!(vad["prefixPaddingMs"], 100);
        assert_eq!(vad["silenceDurationMs"], 300);
    }

    #[test]
    fn setup_message_vad_disabled() {
        let config = SessionConfig {
            vad: VadPolicy::Disabled,
            ..Default::default()
        };
        let json = to_json(&build_setup_message(&config));
        let vad = &json["setup"]["realtimeInputConfig"]["automaticActivityDetection"];

        assert_eq!(vad["disabled"], true);
        assert!(vad.get("startOfSpeechSensitivity").is_none());
    }

    #[test]
    fn setup_message_tools_and_system_instruction() {
        let config = SessionConfig {
            system_instruction: Some("Be terse.".into()),
            tools: vec![ToolDecl {
                name: "lookup".into(),
                description: "Look something up".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            ..Default::default()
        };
        let json = to_json(&build_setup_message(&config));

        assert_eq!(
            json["setup"]["systemInstruction"]["parts"][0]["text"],
            "Be terse."
        );
        assert_eq!(
            json["setup"]["tools"][0]["functionDeclarations"][0]["name"],
            "lookup"
        );
    }

    #[test]
    fn text_message_round_trip() {
        let msg = build_text_message("hello there", true);
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ClientContentMessage = serde_json::from_str(&json).unwrap();

        let turns = parsed.client_content.turns.unwrap();
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[0].parts[0].text, "hello there");
        assert!(parsed.client_content.turn_complete);
    }

    #[test]
    fn text_message_uses_snake_case() {
        let json = to_json(&build_text_message("hi", false));
        assert!(json.get("client_content").is_some());
        assert_eq!(json["client_content"]["turn_complete"], false);
    }

    #[test]
    fn turn_complete_only_frame() {
        let json = to_json(&build_turn_complete_message());
        assert_eq!(json["client_content"]["turn_complete"], true);
        assert!(json["client_content"].get("turns").is_none());
    }

    #[test]
    fn media_message_encodes_base64() {
        let pcm = [0u8, 1, 2, 3, 4, 5];
        let json = to_json(&build_media_message(&pcm));

        let chunk = &json["realtime_input"]["media_chunks"][0];
        assert_eq!(chunk["mime_type"], "audio/pcm");
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(chunk["data"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, pcm);
    }

    #[test]
    fn activity_markers_use_camel_case() {
        let start = to_json(&build_activity_start());
        assert!(start["realtime_input"]["activityStart"].is_object());
        assert!(start["realtime_input"].get("media_chunks").is_none());

        let end = to_json(&build_activity_end());
        assert!(end["realtime_input"]["activityEnd"].is_object());
    }

    #[test]
    fn tool_response_passes_json_through() {
        let responses = [ToolResponse::ok("call_1", r#"{"status":"active"}"#)];
        let json = to_json(&build_tool_response_message(&responses));

        let fr = &json["toolResponse"]["functionResponses"][0];
        assert_eq!(fr["id"], "call_1");
        assert_eq!(fr["response"]["status"], "active");
        assert!(fr.get("error").is_none());
    }

    #[test]
    fn tool_response_wraps_non_json() {
        let responses = [ToolResponse::error("call_2", "plain text failure")];
        let json = to_json(&build_tool_response_message(&responses));

        let fr = &json["toolResponse"]["functionResponses"][0];
        assert_eq!(fr["response"]["result"], "plain text failure");
        assert_eq!(fr["error"], true);
    }

    #[test]
    fn parse_setup_complete() {
        let msg = parse_server_message(br#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
        assert!(msg.server_content.is_none());
    }

    #[test]
    fn parse_server_content_with_parts() {
        let raw = br#"{"serverContent": {"modelTurn": {"parts": [{"text": "Hi"}, {"inlineData": {"mimeType": "audio/pcm", "data": "AAAA"}}]}, "turnComplete": true}}"#;
        let msg = parse_server_message(raw).unwrap();
        let content = msg.server_content.unwrap();

        assert!(content.turn_complete);
        let parts = &content.model_turn.unwrap().parts;
        assert_eq!(parts[0].text.as_deref(), Some("Hi"));
        let inline = parts[1].inline_data.as_ref().unwrap();
        assert_eq!(inline.mime_type, "audio/pcm");
        assert_eq!(inline.data, "AAAA");
    }

    #[test]
    fn parse_tool_call() {
        let raw = br#"{"toolCall": {"functionCalls": [{"id": "fc-1", "name": "lookup", "args": {"q": "x"}}]}}"#;
        let msg = parse_server_message(raw).unwrap();
        let calls = &msg.tool_call.unwrap().function_calls;

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "fc-1");
        assert_eq!(calls[0].name, "lookup");
        assert_eq!(calls[0].args["q"], "x");
    }

    #[test]
    fn parse_usage_metadata() {
        let raw = br#"{"usageMetadata": {"promptTokenCount": 10, "responseTokenCount": 4, "totalTokenCount": 14}}"#;
        let msg = parse_server_message(raw).unwrap();
        let usage = msg.usage_metadata.unwrap();

        assert_eq!(usage.prompt_token_count, 10);
        assert_eq!(usage.response_token_count, 4);
        assert_eq!(usage.total_token_count, 14);
    }

    #[test]
    fn parse_rejects_invalid_json() {
        let err = parse_server_message(b"not json").unwrap_err();
        assert!(matches!(err, Error::ProtocolParse(_)));
    }

    #[test]
    fn parse_ignores_unknown_fields() {
        let raw = br#"{"serverContent": {"turnComplete": true, "futureField": 1}, "somethingNew": {}}"#;
        let msg = parse_server_message(raw).unwrap();
        assert!(msg.server_content.unwrap().turn_complete);
    }
}
