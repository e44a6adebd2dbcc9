//! Streaming client for the Gemini Live API (BidiGenerateContent).
//!
//! A long-lived, full-duplex WebSocket session that multiplexes client
//! input (audio chunks, text turns, activity signals, tool responses)
//! against server output (text, audio, transcriptions, tool calls,
//! usage metadata, turn and interruption signals), with keepalive,
//! automatic reconnection, and a turn/VAD state machine. A parallel
//! non-streaming path translates canonical chat history into
//! `generateContent` requests for tool-calling round trips.
//!
//! ## Protocol Overview
//!
//! 1. **Connect** — open the WebSocket with the API key header
//! 2. **Setup** — send the configuration frame, await `setupComplete`
//! 3. **Stream** — interleave realtime input and typed output chunks
//! 4. **Close** — cancel the scope, close the socket, close the output
//!    channel exactly once
//!
//! Reconnection re-sends the cached setup message on a fresh socket;
//! conversation context is not replayed across the boundary.

pub mod chunk;
pub mod config;
pub mod error;
pub mod generate;
pub mod manager;
pub mod retry;
pub mod router;
pub mod session;
pub mod state;
pub mod transport;
pub mod wire;

pub use chunk::{CostInfo, FinishReason, MediaDelta, SessionChunk, ToolCall, ToolResponse};
pub use config::{
    CostRates, EndSensitivity, Modality, SessionConfig, SilenceConfig, ToolDecl, VadPolicy,
    VadSensitivity, VadTuning,
};
pub use error::Error;
pub use generate::{ChatMessage, ChatRole, GenerateClient, GenerateError, GenerateResponse};
pub use manager::SessionManager;
pub use session::{Session, DEFAULT_LIVE_URL};
pub use state::{ActivityState, TurnState};
