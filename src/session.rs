//! Live session: owns the transport, drives the setup handshake, spawns
//! the receive loop, exposes the send surface, and reconnects on drop.
//!
//! ## Lifecycle
//!
//! 1. **Validate** — modality conflicts are rejected before any I/O
//! 2. **Dial** — WebSocket connect with retry, API key in the header
//! 3. **Setup** — send the setup message, await `setupComplete` (10 s)
//! 4. **Stream** — heartbeat + receive loop run until close or failure
//! 5. **Close** — cancel the scope, close the transport, close the
//!    output channel exactly once
//!
//! On a mid-session drop with `auto_reconnect` set, the receive loop
//! swaps in a fresh transport, re-sends the cached setup message, and
//! resumes. Conversation context is NOT replayed: consumers must
//! tolerate context loss across the reconnect boundary.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chunk::{SessionChunk, ToolResponse};
use crate::config::{CostRates, SessionConfig};
use crate::error::Error;
use crate::retry::RetryPolicy;
use crate::router;
use crate::state::{ChunkAction, EndInputAction, SessionStateMachine};
use crate::transport::ConnTransport;
use crate::wire::{self, ServerMessage, SetupMessage};

/// Gemini Live WebSocket endpoint.
pub const DEFAULT_LIVE_URL: &str =
    "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// How long to wait for the server's `setupComplete` ack.
pub const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Keepalive ping interval.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Output channel depth before the receive loop backpressures.
const CHUNK_CHANNEL_CAPACITY: usize = 256;

struct SessionShared {
    config: SessionConfig,
    rates: CostRates,
    url: String,
    api_key: String,
    /// Setup message cached verbatim for re-send after reconnect.
    setup: SetupMessage,
    /// Current transport; swapped atomically on reconnect.
    transport: tokio::sync::Mutex<Arc<ConnTransport>>,
    /// Guards the closed, reconnecting, and activity flags.
    state: parking_lot::Mutex<SessionStateMachine>,
    /// Single-slot error channel: first error wins, the rest are dropped.
    error: parking_lot::Mutex<Option<Error>>,
    cancel: CancellationToken,
    heartbeat_cancel: parking_lot::Mutex<CancellationToken>,
}

/// A handle to a live streaming session.
///
/// Created by [`Session::connect`]. Typed chunks are read via
/// [`Session::recv_chunk`]; the channel closes when the session ends.
pub struct Session {
    shared: Arc<SessionShared>,
    /// Channel of typed chunks from the model.
    pub chunk_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<SessionChunk>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl Session {
    /// Connect to the Gemini Live API.
    pub async fn connect(config: SessionConfig, api_key: &str) -> Result<Self, Error> {
        Self::connect_to(DEFAULT_LIVE_URL, config, api_key).await
    }

    /// Connect to a specific endpoint URL.
    pub async fn connect_to(url: &str, config: SessionConfig, api_key: &str) -> Result<Self, Error> {
        Self::connect_scoped(url, config, api_key, &CancellationToken::new()).await
    }

    /// Connect with the session scope derived from a caller-provided
    /// token; cancelling the parent aborts the dial and handshake.
    pub async fn connect_scoped(
        url: &str,
        config: SessionConfig,
        api_key: &str,
        parent: &CancellationToken,
    ) -> Result<Self, Error> {
        config.validate()?;
        let cancel = parent.child_token();

        tracing::info!(model = %config.resolved_model(), "connecting to Gemini Live");

        let retry = RetryPolicy::initial_connect();
        let mut attempt = 0;
        let transport = loop {
            attempt += 1;
            match ConnTransport::connect(url, api_key).await {
                Ok(transport) => break Arc::new(transport),
                Err(e) if attempt < retry.max_tries => {
                    tracing::warn!(attempt, error = %e, "Gemini Live dial failed, retrying");
                    retry.sleep(attempt, &cancel).await?;
                }
                Err(e) => return Err(e),
            }
        };

        let setup = wire::build_setup_message(&config);
        transport.send_json(&setup).await?;
        if let Err(e) = await_setup_complete(&transport, &cancel).await {
            transport.close().await;
            cancel.cancel();
            return Err(e);
        }
        tracing::info!("Gemini Live setup complete, ready to stream");

        let heartbeat_cancel = cancel.child_token();
        transport.spawn_heartbeat(HEARTBEAT_INTERVAL, heartbeat_cancel.clone());

        let mut state = SessionStateMachine::new(&config.vad, config.silence.clone());
        state.on_setup_complete();

        let rates = config.cost_rates();
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let shared = Arc::new(SessionShared {
            config,
            rates,
            url: url.to_string(),
            api_key: api_key.to_string(),
            setup,
            transport: tokio::sync::Mutex::new(transport),
            state: parking_lot::Mutex::new(state),
            error: parking_lot::Mutex::new(None),
            cancel,
            heartbeat_cancel: parking_lot::Mutex::new(heartbeat_cancel),
        });

        tokio::spawn(receive_loop(Arc::clone(&shared), chunk_tx));

        Ok(Self {
            shared,
            chunk_rx: Arc::new(tokio::sync::Mutex::new(chunk_rx)),
        })
    }

    async fn current_transport(&self) -> Arc<ConnTransport> {
        self.shared.transport.lock().await.clone()
    }

    // ── Send surface ──────────────────────────────────────────────

    /// Send a raw PCM chunk as base64 media. With VAD disabled, the
    /// first chunk of a turn is preceded by `activityStart`.
    pub async fn send_chunk(&self, pcm: &[u8]) -> Result<(), Error> {
        let action = self.shared.state.lock().begin_media_chunk()?;
        let transport = self.current_transport().await;
        if action == ChunkAction::SendWithActivityStart {
            transport.send_json(&wire::build_activity_start()).await?;
        }
        transport.send_json(&wire::build_media_message(pcm)).await
    }

    /// Send a user text turn; always completes the turn.
    pub async fn send_text(&self, text: &str) -> Result<(), Error> {
        self.shared.state.lock().begin_text(true)?;
        self.current_transport()
            .await
            .send_json(&wire::build_text_message(text, true))
            .await
    }

    /// Inject context as user text without completing the turn.
    pub async fn send_system_context(&self, text: &str) -> Result<(), Error> {
        self.shared.state.lock().begin_text(false)?;
        self.current_transport()
            .await
            .send_json(&wire::build_text_message(text, false))
            .await
    }

    /// Close the current user turn with a lone turn-complete frame.
    pub async fn complete_turn(&self) -> Result<(), Error> {
        self.shared.state.lock().begin_complete_turn()?;
        self.current_transport()
            .await
            .send_json(&wire::build_turn_complete_message())
            .await
    }

    /// Signal end of user input. With VAD disabled this emits
    /// `activityEnd`; with VAD enabled it emits the configured tail of
    /// silent frames so the server VAD can trigger end-of-speech.
    pub async fn end_input(&self) -> Result<(), Error> {
        let action = self.shared.state.lock().end_input()?;
        let transport = self.current_transport().await;
        match action {
            EndInputAction::ActivityEnd => {
                transport.send_json(&wire::build_activity_end()).await
            }
            EndInputAction::SilenceFrames(silence) => {
                let frame = vec![0u8; silence.frame_bytes];
                let msg = wire::build_media_message(&frame);
                for i in 0..silence.frames {
                    transport.send_json(&msg).await?;
                    if i + 1 < silence.frames {
                        tokio::select! {
                            _ = self.shared.cancel.cancelled() => return Err(Error::SessionClosed),
                            _ = tokio::time::sleep(Duration::from_millis(silence.gap_ms)) => {}
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Send one tool execution result back to the model.
    pub async fn send_tool_response(
        &self,
        tool_call_id: &str,
        result: &str,
    ) -> Result<(), Error> {
        self.send_tool_responses(&[ToolResponse::ok(tool_call_id, result)])
            .await
    }

    /// Send a batch of tool execution results.
    pub async fn send_tool_responses(&self, responses: &[ToolResponse]) -> Result<(), Error> {
        self.shared.state.lock().begin_tool_response()?;
        self.current_transport()
            .await
            .send_json(&wire::build_tool_response_message(responses))
            .await
    }

    // ── Consumption ───────────────────────────────────────────────

    /// Receive the next chunk; `None` once the session has terminated
    /// and the channel has drained.
    pub async fn recv_chunk(&self) -> Option<SessionChunk> {
        self.chunk_rx.lock().await.recv().await
    }

    /// Resolves when the session terminates (close or fatal error).
    pub async fn done(&self) {
        self.shared.cancel.cancelled().await;
    }

    /// Snapshot of the stored post-mortem error, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.shared.error.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().is_closed()
    }

    /// Tear the session down. Idempotent: only the first call performs
    /// the teardown. All subsequent send operations fail with
    /// `session is closed`.
    pub async fn close(&self) {
        let first = self.shared.state.lock().mark_closed();
        if !first {
            return;
        }
        self.shared.cancel.cancel();
        self.current_transport().await.close().await;
        tracing::info!("Gemini Live session closed");
    }
}

// ── Handshake ──────────────────────────────────────────────────────

/// Wait for the server's first message and require it to be
/// `setupComplete`.
async fn await_setup_complete(
    transport: &ConnTransport,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let ack = async {
        let raw = transport.receive(cancel).await?;
        let msg = wire::parse_server_message(&raw)
            .map_err(|e| Error::HandshakeInvalid(e.to_string()))?;
        if msg.setup_complete.is_some() {
            Ok(())
        } else {
            Err(Error::HandshakeInvalid(
                "first server message was not setupComplete".to_string(),
            ))
        }
    };
    match tokio::time::timeout(SETUP_TIMEOUT, ack).await {
        Ok(result) => result,
        Err(_) => Err(Error::HandshakeTimeout),
    }
}

// ── Receive loop ───────────────────────────────────────────────────

async fn receive_loop(shared: Arc<SessionShared>, chunk_tx: mpsc::Sender<SessionChunk>) {
    let mut transport = shared.transport.lock().await.clone();

    'recv: loop {
        let raw = match transport.receive(&shared.cancel).await {
            Ok(raw) => raw,
            Err(Error::SessionClosed) => break,
            Err(e) => {
                let reconnectable = shared.config.auto_reconnect
                    && e.is_reconnectable()
                    && !shared.cancel.is_cancelled();
                if reconnectable {
                    tracing::warn!(error = %e, "Gemini Live transport dropped, reconnecting");
                    match reconnect(&shared).await {
                        Ok(fresh) => {
                            transport = fresh;
                            continue;
                        }
                        Err(re) => {
                            store_error(&shared, re);
                            break;
                        }
                    }
                }
                if !shared.cancel.is_cancelled() {
                    store_error(&shared, Error::WebSocket(e.to_string()));
                }
                break;
            }
        };

        let msg = match wire::parse_server_message(&raw) {
            Ok(msg) => msg,
            Err(e) => {
                // Per-message skip: a malformed frame is recorded but
                // does not kill the session.
                tracing::warn!(error = %e, "skipping unparseable server frame");
                store_error(&shared, e);
                continue;
            }
        };

        observe(&shared, &msg);

        for chunk in router::route(&msg, &shared.rates) {
            tokio::select! {
                _ = shared.cancel.cancelled() => break 'recv,
                sent = chunk_tx.send(chunk) => {
                    if sent.is_err() {
                        tracing::debug!("chunk receiver dropped, stopping receive loop");
                        break 'recv;
                    }
                }
            }
        }
    }

    shared.cancel.cancel();
    tracing::debug!("receive loop terminated");
    // chunk_tx drops here: the output channel closes exactly once.
}

/// Feed server-side turn signals into the state machine.
fn observe(shared: &SessionShared, msg: &ServerMessage) {
    let mut state = shared.state.lock();
    if msg.setup_complete.is_some() {
        state.on_setup_complete();
    }
    if let Some(tool_call) = &msg.tool_call {
        if !tool_call.function_calls.is_empty() {
            state.on_tool_call();
        }
    }
    if let Some(content) = &msg.server_content {
        if content.interrupted {
            state.on_interrupted();
        } else {
            if content.model_turn.is_some() {
                state.on_model_content();
            }
            if content.turn_complete {
                state.on_turn_complete();
            }
        }
    }
}

fn store_error(shared: &SessionShared, error: Error) {
    // Intentional teardown is not a fault.
    if error == Error::SessionClosed {
        return;
    }
    let mut slot = shared.error.lock();
    if slot.is_none() {
        *slot = Some(error);
    }
}

// ── Reconnection ───────────────────────────────────────────────────

async fn reconnect(shared: &Arc<SessionShared>) -> Result<Arc<ConnTransport>, Error> {
    if !shared.state.lock().try_begin_reconnect() {
        return Err(Error::WebSocket("reconnect already in progress".to_string()));
    }
    let result = try_reconnect(shared).await;
    shared.state.lock().end_reconnect();
    result
}

async fn try_reconnect(shared: &Arc<SessionShared>) -> Result<Arc<ConnTransport>, Error> {
    // Stop the old heartbeat and discard the dead socket first.
    shared.heartbeat_cancel.lock().cancel();
    let old = shared.transport.lock().await.clone();
    old.reset().await;

    let policy = RetryPolicy::reconnect();
    let tries = shared.config.max_reconnect_tries.max(1);
    let mut last = Error::WebSocket("reconnect never attempted".to_string());

    for attempt in 1..=tries {
        if shared.cancel.is_cancelled() {
            return Err(Error::SessionClosed);
        }
        match dial_and_handshake(shared).await {
            Ok(fresh) => {
                let heartbeat = shared.cancel.child_token();
                fresh.spawn_heartbeat(HEARTBEAT_INTERVAL, heartbeat.clone());
                *shared.heartbeat_cancel.lock() = heartbeat;
                *shared.transport.lock().await = Arc::clone(&fresh);
                // Fresh connection, fresh turn; context is not replayed.
                shared.state.lock().on_setup_complete();
                tracing::info!(attempt, "Gemini Live reconnected");
                return Ok(fresh);
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Gemini Live reconnect attempt failed");
                last = e;
                if attempt < tries {
                    policy.sleep(attempt, &shared.cancel).await?;
                }
            }
        }
    }

    Err(Error::WebSocket(format!(
        "reconnect failed after {tries} attempts: {last}"
    )))
}

async fn dial_and_handshake(shared: &Arc<SessionShared>) -> Result<Arc<ConnTransport>, Error> {
    let transport = Arc::new(ConnTransport::connect(&shared.url, &shared.api_key).await?);
    transport.send_json(&shared.setup).await?;
    if let Err(e) = await_setup_complete(&transport, &shared.cancel).await {
        transport.close().await;
        return Err(e);
    }
    Ok(transport)
}

// ── Tests ──────────────────────────────────────────────────────────
