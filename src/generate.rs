//! Non-streaming tool request path (`generateContent`).
//!
//! Translates a canonical chat history into the provider's `contents`
//! array and parses the structured response back into text plus tool
//! calls. The translation rules are the subtle part:
//!
//! - `assistant` maps to the wire role `model`; `tool` messages are not
//!   a wire role at all, they become `functionResponse` parts inside a
//!   `user` content block
//! - consecutive tool results are grouped into one `user` content, in
//!   order, so parallel tool calls correlate correctly
//! - every exit path stamps `latency`, success or not

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error as ThisError;

use crate::chunk::{CostInfo, ToolCall};
use crate::config::{CostRates, ToolDecl};
use crate::error::Error;
use crate::wire::UsageMetadata;

/// Base URL for the non-streaming HTTP API.
pub const DEFAULT_GENERATE_BASE_URL: &str = "https://generativelanguage.googleapis.com";

// ── Canonical chat history ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
    Tool,
}

/// One message of canonical history handed to the request builder.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Tool invocations attached to an assistant message.
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages: id of the call this result answers.
    pub tool_call_id: Option<String>,
    /// For tool messages: function name carried on the wire.
    pub tool_name: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn tool(
        name: impl Into<String>,
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            tool_name: Some(name.into()),
        }
    }
}

// ── Request building ───────────────────────────────────────────────

/// Coerce a tool result string into a `functionResponse.response`
/// payload: a JSON object passes through unchanged, any other JSON
/// value is wrapped under `{"result": …}`, and a non-JSON string is
/// wrapped verbatim.
fn tool_result_value(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => json!({ "result": other }),
        Err(_) => json!({ "result": content }),
    }
}

fn function_response_part(msg: &ChatMessage) -> Value {
    let name = msg.tool_name.as_deref().unwrap_or("");
    if name.is_empty() {
        tracing::warn!(
            tool_call_id = msg.tool_call_id.as_deref().unwrap_or(""),
            "tool result carries an empty tool name"
        );
    }
    json!({
        "functionResponse": {
            "name": name,
            "response": tool_result_value(&msg.content),
        }
    })
}

fn function_call_part(call: &ToolCall) -> Value {
    // Args are stored as a raw JSON string; fall back to the string
    // itself when it does not parse.
    let args = serde_json::from_str::<Value>(&call.args)
        .unwrap_or_else(|_| Value::String(call.args.clone()));
    json!({
        "functionCall": {
            "name": call.name,
            "args": args,
        }
    })
}

/// Translate canonical history into the provider's `contents` array.
pub fn build_contents(messages: &[ChatMessage]) -> Vec<Value> {
    let mut contents = Vec::new();
    let mut pending: Vec<Value> = Vec::new();

    for msg in messages {
        match msg.role {
            ChatRole::Tool => {
                pending.push(function_response_part(msg));
            }
            ChatRole::User => {
                // Pending tool results attach to the front of the next
                // user content.
                let mut parts = std::mem::take(&mut pending);
                if !msg.content.is_empty() {
                    parts.push(json!({ "text": msg.content }));
                }
                if !parts.is_empty() {
                    contents.push(json!({ "role": "user", "parts": parts }));
                }
            }
            ChatRole::Assistant => {
                // Tool results cannot live inside a model turn; flush
                // them as their own user content first.
                if !pending.is_empty() {
                    contents.push(json!({ "role": "user", "parts": std::mem::take(&mut pending) }));
                }
                let mut parts = Vec::new();
                if !msg.content.is_empty() {
                    parts.push(json!({ "text": msg.content }));
                }
                for call in &msg.tool_calls {
                    parts.push(function_call_part(call));
                }
                if !parts.is_empty() {
                    contents.push(json!({ "role": "model", "parts": parts }));
                }
            }
        }
    }

    if !pending.is_empty() {
        contents.push(json!({ "role": "user", "parts": pending }));
    }

    contents
}

/// Map a caller tool-choice string to the wire
/// `function_calling_config.mode`.
pub fn map_tool_choice(choice: &str) -> &'static str {
    match choice {
        "auto" | "" => "AUTO",
        "required" | "any" => "ANY",
        "none" => "NONE",
        _ => "ANY",
    }
}

/// Build the full request body.
pub fn build_request(
    messages: &[ChatMessage],
    tools: Option<&[ToolDecl]>,
    tool_choice: &str,
    system: Option<&str>,
) -> Value {
    let mut body = json!({ "contents": build_contents(messages) });

    if let Some(system) = system.filter(|s| !s.is_empty()) {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    if let Some(tools) = tools.filter(|t| !t.is_empty()) {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                })
            })
            .collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
        body["tool_config"] = json!({
            "function_calling_config": { "mode": map_tool_choice(tool_choice) }
        });
    }

    body
}

// ── Response parsing ───────────────────────────────────────────────

/// Parsed generateContent response.
#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Option<CostInfo>,
    /// Wall time from request start; populated on every exit path.
    pub latency: Duration,
}

/// Error from the generate path. Carries the latency measured up to the
/// failure, honoring the same contract as the success path.
#[derive(Debug, Clone, PartialEq, ThisError)]
#[error("{source}")]
pub struct GenerateError {
    pub latency: Duration,
    #[source]
    pub source: Error,
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    candidates: Vec<RawCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<RawUsage>,
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    content: Option<RawContent>,
    #[serde(rename = "finishReason", default)]
    finish_reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Debug, Deserialize)]
struct RawPart {
    text: Option<String>,
    #[serde(rename = "functionCall")]
    function_call: Option<RawFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct RawFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: u64,
    #[serde(rename = "totalTokenCount", default)]
    total_token_count: u64,
}

/// Parse a raw response body. Latency is measured from `started` and is
/// present on the return value in both the success and error cases.
pub fn parse_response(
    raw: &[u8],
    rates: &CostRates,
    started: Instant,
) -> Result<GenerateResponse, GenerateError> {
    let result = parse_inner(raw, rates);
    let latency = started.elapsed();
    match result {
        Ok(mut response) => {
            response.latency = latency;
            Ok(response)
        }
        Err(source) => Err(GenerateError { latency, source }),
    }
}

fn parse_inner(raw: &[u8], rates: &CostRates) -> Result<GenerateResponse, Error> {
    let parsed: RawResponse =
        serde_json::from_slice(raw).map_err(|e| Error::ProtocolParse(e.to_string()))?;

    let candidate = parsed.candidates.first().ok_or(Error::NoCandidates)?;
    let parts = candidate
        .content
        .as_ref()
        .map(|content| content.parts.as_slice())
        .unwrap_or(&[]);

    if parts.is_empty() {
        return Err(match candidate.finish_reason.as_str() {
            "MAX_TOKENS" => Error::MaxTokensReached,
            "SAFETY" => Error::SafetyBlocked,
            "RECITATION" => Error::RecitationBlocked,
            other => Error::EmptyCandidate(other.to_string()),
        });
    }

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for part in parts {
        if let Some(text) = &part.text {
            content.push_str(text);
        }
        if let Some(call) = &part.function_call {
            // The raw API carries no tool-call ids on this path; ids
            // are synthesized and are not stable across requests.
            tool_calls.push(ToolCall {
                id: format!("call_{}", tool_calls.len()),
                name: call.name.clone(),
                args: serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string()),
            });
        }
    }

    let (input_tokens, output_tokens, cost) = match &parsed.usage_metadata {
        Some(usage) => {
            let usage = UsageMetadata {
                prompt_token_count: usage.prompt_token_count,
                response_token_count: usage.candidates_token_count,
                total_token_count: usage.total_token_count,
            };
            (
                usage.prompt_token_count,
                usage.response_token_count,
                Some(CostInfo::from_usage(&usage, rates)),
            )
        }
        None => (0, 0, None),
    };

    Ok(GenerateResponse {
        content,
        tool_calls,
        input_tokens,
        output_tokens,
        cost,
        latency: Duration::ZERO,
    })
}

// ── HTTP client ────────────────────────────────────────────────────

/// Client for the non-streaming generateContent endpoint.
pub struct GenerateClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    rates: CostRates,
}

impl GenerateClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_GENERATE_BASE_URL, api_key, model)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            rates: CostRates::default(),
        }
    }

    /// Use the given per-1K rates for cost computation.
    pub fn with_rates(mut self, rates: CostRates) -> Self {
        self.rates = rates;
        self
    }

    /// Replace the HTTP client (shared pools, custom timeouts).
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }

    /// Run one generate round trip. The returned latency covers the
    /// full request, and is also populated on errors.
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDecl]>,
        tool_choice: &str,
        system: Option<&str>,
    ) -> Result<GenerateResponse, GenerateError> {
        let started = Instant::now();
        let body = build_request(messages, tools, tool_choice, system);

        tracing::debug!(model = %self.model, "sending generateContent request");
        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerateError {
                latency: started.elapsed(),
                source: Error::ConnectFailed(e.to_string()),
            })?;

        let status = response.status();
        let raw = response.bytes().await.map_err(|e| GenerateError {
            latency: started.elapsed(),
            source: Error::TransportDropped(e.to_string()),
        })?;

        if !status.is_success() {
            return Err(GenerateError {
                latency: started.elapsed(),
                source: Error::HttpStatus {
                    status: status.as_u16(),
                    body: String::from_utf8_lossy(&raw).into_owned(),
                },
            });
        }

        parse_response(&raw, &self.rates, started)
    }
}

// ── Tests ──────────────────────────────────────────────────────────
