//! Typed output chunks emitted to the session consumer, and the tool
//! call/response shapes shared by the streaming and non-streaming paths.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::CostRates;
use crate::wire::UsageMetadata;

/// Sample rate annotation for audio media deltas (16 kHz mono PCM).
pub const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// Terminal classification of a model turn on the streaming path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinishReason {
    /// The model finished its turn.
    #[serde(rename = "complete")]
    Complete,
    /// The model stopped to request tool execution.
    #[serde(rename = "tool_calls")]
    ToolCalls,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Complete => "complete",
            FinishReason::ToolCalls => "tool_calls",
        }
    }
}

/// A media payload (audio) from the model, still base64-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDelta {
    /// Base64-encoded payload, passed through from the wire.
    pub data: String,
    /// MIME type, e.g. `audio/pcm`.
    pub mime_type: String,
    /// Channel count; populated for audio payloads.
    pub channels: Option<u8>,
    /// Sample rate in Hz; populated for audio payloads.
    pub sample_rate: Option<u32>,
}

impl MediaDelta {
    /// Build a delta from inline data, annotating audio payloads with
    /// the fixed mono/16 kHz shape the Live API streams.
    pub fn from_inline(data: String, mime_type: String) -> Self {
        let is_audio = mime_type.starts_with("audio/");
        Self {
            data,
            mime_type,
            channels: is_audio.then_some(1),
            sample_rate: is_audio.then_some(AUDIO_SAMPLE_RATE),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Server-provided id on the streaming path; synthesized
    /// `call_<index>` on the non-streaming path (not stable across
    /// requests).
    pub id: String,
    pub name: String,
    /// Raw JSON argument payload.
    pub args: String,
}

/// A tool execution result heading back to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResponse {
    /// Id of the tool call this answers.
    pub tool_call_id: String,
    /// Result payload; JSON passes through, anything else is wrapped
    /// as `{"result": <string>}` on the wire.
    pub result: String,
    pub is_error: bool,
}

impl ToolResponse {
    pub fn ok(tool_call_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: result.into(),
            is_error: false,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            result: result.into(),
            is_error: true,
        }
    }
}

/// Token counts and USD cost for a response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CostInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
}

impl CostInfo {
    /// Derive cost info from usage metadata. USD amounts are computed
    /// only when both per-1K rates are positive; token counts are
    /// reported either way.
    pub fn from_usage(usage: &UsageMetadata, rates: &CostRates) -> Self {
        let input_tokens = usage.prompt_token_count;
        let output_tokens = usage.response_token_count;
        let total_tokens = if usage.total_token_count > 0 {
            usage.total_token_count
        } else {
            input_tokens + output_tokens
        };

        let (input_cost_usd, output_cost_usd) = if rates.is_priced() {
            (
                input_tokens as f64 / 1000.0 * rates.input_per_1k,
                output_tokens as f64 / 1000.0 * rates.output_per_1k,
            )
        } else {
            (0.0, 0.0)
        };

        Self {
            input_tokens,
            output_tokens,
            total_tokens,
            input_cost_usd,
            output_cost_usd,
            total_cost_usd: input_cost_usd + output_cost_usd,
        }
    }
}

/// One typed chunk fanned out to the session consumer.
///
/// A single server message can produce several chunks (transcription plus
/// model content, for instance); each chunk populates only the fields
/// relevant to what it carries.
#[derive(Debug, Clone, Default)]
pub struct SessionChunk {
    /// Incremental text from this message.
    pub delta: Option<String>,
    /// Text accumulated across the parts of this message.
    pub content: Option<String>,
    /// Audio/media payload.
    pub media: Option<MediaDelta>,
    /// Tool invocations requested by the model.
    pub tool_calls: Vec<ToolCall>,
    /// The model was cut off by new user activity.
    pub interrupted: bool,
    pub finish_reason: Option<FinishReason>,
    pub cost: Option<CostInfo>,
    /// Free-form annotations, e.g. transcription type markers.
    pub metadata: HashMap<String, serde_json::Value>,
}
