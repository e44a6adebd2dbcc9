//! Classification of inbound server messages into consumer chunks.
//!
//! One server frame can yield zero, one, or several chunks: a
//! transcription rides in its own chunk ahead of the model content, and
//! a turn-completion with no content still produces a finish marker.
//! The routing order below is a contract; reordering it changes what
//! consumers observe.

use std::collections::HashMap;

use crate::chunk::{CostInfo, FinishReason, MediaDelta, SessionChunk, ToolCall};
use crate::config::CostRates;
use crate::wire::ServerMessage;

/// Route one decoded server message into consumer chunks.
pub fn route(msg: &ServerMessage, rates: &CostRates) -> Vec<SessionChunk> {
    let mut chunks = Vec::new();

    // Setup ack carries nothing for the consumer.
    if msg.setup_complete.is_some() {
        return chunks;
    }

    // Tool calls preempt everything else in the frame.
    if let Some(tool_call) = &msg.tool_call {
        if !tool_call.function_calls.is_empty() {
            let tool_calls = tool_call
                .function_calls
                .iter()
                .enumerate()
                .map(|(index, call)| ToolCall {
                    id: if call.id.is_empty() {
                        format!("call_{index}")
                    } else {
                        call.id.clone()
                    },
                    name: call.name.clone(),
                    args: serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string()),
                })
                .collect();
            chunks.push(SessionChunk {
                tool_calls,
                finish_reason: Some(FinishReason::ToolCalls),
                ..Default::default()
            });
            return chunks;
        }
    }

    let cost = msg
        .usage_metadata
        .as_ref()
        .map(|usage| CostInfo::from_usage(usage, rates));

    let content = match &msg.server_content {
        Some(content) => content,
        None => {
            // Usage-only frame.
            if let Some(cost) = cost {
                chunks.push(SessionChunk {
                    cost: Some(cost),
                    ..Default::default()
                });
            }
            return chunks;
        }
    };

    if content.interrupted {
        chunks.push(SessionChunk {
            interrupted: true,
            ..Default::default()
        });
        return chunks;
    }

    if let Some(transcription) = &content.input_transcription {
        if !transcription.text.is_empty() {
            let mut metadata = HashMap::new();
            metadata.insert("type".to_string(), "input_transcription".into());
            metadata.insert(
                "transcription".to_string(),
                transcription.text.clone().into(),
            );
            metadata.insert("turn_complete".to_string(), content.turn_complete.into());
            chunks.push(SessionChunk {
                metadata,
                ..Default::default()
            });
        }
    }

    if let Some(transcription) = &content.output_transcription {
        if !transcription.text.is_empty() {
            let mut metadata = HashMap::new();
            metadata.insert("type".to_string(), "output_transcription".into());
            metadata.insert("turn_complete".to_string(), content.turn_complete.into());
            chunks.push(SessionChunk {
                delta: Some(transcription.text.clone()),
                metadata,
                ..Default::default()
            });
        }
    }

    let model_turn = match &content.model_turn {
        Some(turn) => turn,
        None => {
            if content.turn_complete {
                chunks.push(SessionChunk {
                    finish_reason: Some(FinishReason::Complete),
                    cost,
                    ..Default::default()
                });
            }
            return chunks;
        }
    };

    // Accumulate the model turn's parts into a single chunk.
    let mut chunk = SessionChunk::default();
    let mut accumulated = String::new();
    for part in &model_turn.parts {
        if let Some(text) = &part.text {
            accumulated.push_str(text);
            chunk.delta = Some(text.clone());
        }
        if let Some(inline) = &part.inline_data {
            chunk.media = Some(MediaDelta::from_inline(
                inline.data.clone(),
                inline.mime_type.clone(),
            ));
        }
    }
    if !accumulated.is_empty() {
        chunk.content = Some(accumulated);
    }
    if content.turn_complete {
        chunk.finish_reason = Some(FinishReason::Complete);
        chunk.cost = cost;
    }
    chunks.push(chunk);

    chunks
}
