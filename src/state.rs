//! Turn, activity, and tool state for a live session.
//!
//! The machine is purely synchronous; the session consults it under its
//! mutex before touching the wire, and feeds server events back into it
//! from the receive loop. Transitions that the protocol does not predict
//! are logged and clamped rather than panicking: the server is the
//! authority on turn boundaries, and a missed frame must not wedge the
//! client.

use crate::config::{SilenceConfig, VadPolicy};
use crate::error::Error;

/// Where the conversation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Setup sent, waiting for the server ack.
    AwaitingSetupAck,
    /// No turn in flight.
    Idle,
    /// User input is streaming in.
    UserSpeaking,
    /// User turn closed, model has not started responding.
    UserEnded,
    /// Model output is streaming (including tool-call round trips).
    ModelResponding,
}

/// Explicit activity-marker cycle, used only when VAD is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    NoActivity,
    ActivityStartSent,
    ActivityEndSent,
}

/// What a media-chunk send must do before the chunk itself goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAction {
    /// Send the chunk as-is.
    Send,
    /// Emit `activityStart` first (VAD disabled, first chunk of a turn).
    SendWithActivityStart,
}

/// How `end_input` closes the user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndInputAction {
    /// VAD disabled: emit `activityEnd`.
    ActivityEnd,
    /// VAD enabled: emit a tail of silent frames so the server VAD can
    /// detect end-of-speech.
    SilenceFrames(SilenceConfig),
}

/// Session state machine. One instance per session, shared under the
/// session mutex alongside the closed/reconnecting flags.
#[derive(Debug)]
pub struct SessionStateMachine {
    turn: TurnState,
    activity: ActivityState,
    manual_activity: bool,
    silence: SilenceConfig,
    closed: bool,
    reconnecting: bool,
    pending_tool_call: bool,
}

impl SessionStateMachine {
    pub fn new(vad: &VadPolicy, silence: SilenceConfig) -> Self {
        Self {
            turn: TurnState::AwaitingSetupAck,
            activity: ActivityState::NoActivity,
            manual_activity: vad.is_manual(),
            silence,
            closed: false,
            reconnecting: false,
            pending_tool_call: false,
        }
    }

    pub fn turn_state(&self) -> TurnState {
        self.turn
    }

    pub fn activity_state(&self) -> ActivityState {
        self.activity
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Flip the closed flag; returns true only for the first call so the
    /// caller can run teardown exactly once.
    pub fn mark_closed(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    /// Claim the reconnect guard; false if another reconnect holds it.
    pub fn try_begin_reconnect(&mut self) -> bool {
        if self.reconnecting {
            return false;
        }
        self.reconnecting = true;
        true
    }

    pub fn end_reconnect(&mut self) {
        self.reconnecting = false;
    }

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    // ── Outbound gates ────────────────────────────────────────────

    /// Gate a media chunk send. In manual-activity mode the first chunk
    /// of a turn must be preceded by `activityStart`.
    pub fn begin_media_chunk(&mut self) -> Result<ChunkAction, Error> {
        self.ensure_open()?;
        self.turn = match self.turn {
            TurnState::Idle | TurnState::UserEnded => TurnState::UserSpeaking,
            other => other,
        };
        if self.manual_activity && self.activity != ActivityState::ActivityStartSent {
            self.activity = ActivityState::ActivityStartSent;
            return Ok(ChunkAction::SendWithActivityStart);
        }
        Ok(ChunkAction::Send)
    }

    /// Gate a text turn (`turn_complete` text closes the user turn).
    pub fn begin_text(&mut self, turn_complete: bool) -> Result<(), Error> {
        self.ensure_open()?;
        if turn_complete {
            self.turn = TurnState::UserEnded;
        }
        Ok(())
    }

    /// Gate a lone turn-complete frame.
    pub fn begin_complete_turn(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        self.turn = TurnState::UserEnded;
        Ok(())
    }

    /// Close the user input phase. Manual mode emits `activityEnd` and
    /// resets the marker cycle; VAD mode emits the silence tail.
    pub fn end_input(&mut self) -> Result<EndInputAction, Error> {
        self.ensure_open()?;
        self.turn = TurnState::UserEnded;
        if self.manual_activity {
            // ActivityStartSent -> ActivityEndSent -> NoActivity; the
            // end marker completes the cycle immediately.
            self.activity = ActivityState::NoActivity;
            Ok(EndInputAction::ActivityEnd)
        } else {
            Ok(EndInputAction::SilenceFrames(self.silence.clone()))
        }
    }

    /// Gate a tool response send. Legal between an observed toolCall and
    /// the following turnComplete; outside that window the send is still
    /// allowed (the server arbitrates) but flagged.
    pub fn begin_tool_response(&mut self) -> Result<(), Error> {
        self.ensure_open()?;
        if !self.pending_tool_call {
            tracing::warn!("tool response sent with no pending tool call");
        }
        Ok(())
    }

    // ── Server events ─────────────────────────────────────────────

    pub fn on_setup_complete(&mut self) {
        if self.turn != TurnState::AwaitingSetupAck {
            tracing::debug!(state = ?self.turn, "setupComplete outside handshake");
        }
        self.turn = TurnState::Idle;
        self.activity = ActivityState::NoActivity;
        self.pending_tool_call = false;
    }

    pub fn on_model_content(&mut self) {
        self.turn = TurnState::ModelResponding;
    }

    pub fn on_tool_call(&mut self) {
        // Tool round trips keep the model turn open until turnComplete.
        self.pending_tool_call = true;
        self.turn = TurnState::ModelResponding;
    }

    pub fn on_turn_complete(&mut self) {
        self.pending_tool_call = false;
        self.turn = TurnState::Idle;
    }

    pub fn on_interrupted(&mut self) {
        if self.turn != TurnState::ModelResponding {
            tracing::debug!(state = ?self.turn, "interrupted outside model turn");
        }
        self.turn = TurnState::UserSpeaking;
    }

    pub fn has_pending_tool_call(&self) -> bool {
        self.pending_tool_call
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VadTuning;

    fn machine(vad: VadPolicy) -> SessionStateMachine {
        SessionStateMachine::new(&vad, SilenceConfig::default())
    }

    #[test]
    fn full_turn_cycle() {
        let mut sm = machine(VadPolicy::Automatic(VadTuning::default()));
        assert_eq!(sm.turn_state(), TurnState::AwaitingSetupAck);

        sm.on_setup_complete();
        assert_eq!(sm.turn_state(), TurnState::Idle);

        sm.begin_media_chunk().unwrap();
        assert_eq!(sm.turn_state(), TurnState::UserSpeaking);

        sm.end_input().unwrap();
        assert_eq!(sm.turn_state(), TurnState::UserEnded);

        sm.on_model_content();
        assert_eq!(sm.turn_state(), TurnState::ModelResponding);

        sm.on_turn_complete();
        assert_eq!(sm.turn_state(), TurnState::Idle);
    }

    #[test]
    fn interruption_returns_to_user_speaking() {
        let mut sm = machine(VadPolicy::ServerDefault);
        sm.on_setup_complete();
        sm.on_model_content();

        sm.on_interrupted();
        assert_eq!(sm.turn_state(), TurnState::UserSpeaking);
    }

    #[test]
    fn tool_call_keeps_model_turn_open() {
        let mut sm = machine(VadPolicy::ServerDefault);
        sm.on_setup_complete();
        sm.on_model_content();

        sm.on_tool_call();
        assert!(sm.has_pending_tool_call());
        assert_eq!(sm.turn_state(), TurnState::ModelResponding);
        sm.begin_tool_response().unwrap();

        sm.on_turn_complete();
        assert!(!sm.has_pending_tool_call());
        assert_eq!(sm.turn_state(), TurnState::Idle);
    }

    #[test]
    fn manual_mode_emits_activity_start_once_per_turn() {
        let mut sm = machine(VadPolicy::Disabled);
        sm.on_setup_complete();

        assert_eq!(
            sm.begin_media_chunk().unwrap(),
            ChunkAction::SendWithActivityStart
        );
        assert_eq!(sm.activity_state(), ActivityState::ActivityStartSent);
        assert_eq!(sm.begin_media_chunk().unwrap(), ChunkAction::Send);

        assert_eq!(sm.end_input().unwrap(), EndInputAction::ActivityEnd);
        assert_eq!(sm.activity_state(), ActivityState::NoActivity);

        // Next turn starts the marker cycle over.
        assert_eq!(
            sm.begin_media_chunk().unwrap(),
            ChunkAction::SendWithActivityStart
        );
    }

    #[test]
    fn vad_mode_emits_silence_tail() {
        let mut sm = machine(VadPolicy::Automatic(VadTuning::default()));
        sm.on_setup_complete();
        sm.begin_media_chunk().unwrap();

        match sm.end_input().unwrap() {
            EndInputAction::SilenceFrames(silence) => {
                assert_eq!(silence.frames, 8);
                assert_eq!(silence.frame_bytes, 16_000);
                assert_eq!(silence.gap_ms, 50);
            }
            other => panic!("expected silence tail, got {other:?}"),
        }
        // No activity markers in VAD mode.
        assert_eq!(sm.activity_state(), ActivityState::NoActivity);
    }

    #[test]
    fn server_default_vad_also_uses_silence_tail() {
        let mut sm = machine(VadPolicy::ServerDefault);
        sm.on_setup_complete();
        assert!(matches!(
            sm.end_input().unwrap(),
            EndInputAction::SilenceFrames(_)
        ));
    }

    #[test]
    fn closed_machine_rejects_everything() {
        let mut sm = machine(VadPolicy::Disabled);
        sm.on_setup_complete();

        assert!(sm.mark_closed());
        assert!(!sm.mark_closed(), "second close is a no-op");

        assert_eq!(sm.begin_media_chunk().unwrap_err(), Error::SessionClosed);
        assert_eq!(sm.begin_text(true).unwrap_err(), Error::SessionClosed);
        assert_eq!(sm.begin_complete_turn().unwrap_err(), Error::SessionClosed);
        assert_eq!(sm.end_input().unwrap_err(), Error::SessionClosed);
        assert_eq!(sm.begin_tool_response().unwrap_err(), Error::SessionClosed);
    }

    #[test]
    fn reconnect_guard_is_exclusive() {
        let mut sm = machine(VadPolicy::ServerDefault);
        assert!(sm.try_begin_reconnect());
        assert!(sm.is_reconnecting());
        assert!(!sm.try_begin_reconnect());
        sm.end_reconnect();
        assert!(sm.try_begin_reconnect());
    }

    #[test]
    fn system_context_does_not_close_turn() {
        let mut sm = machine(VadPolicy::ServerDefault);
        sm.on_setup_complete();

        sm.begin_text(false).unwrap();
        assert_eq!(sm.turn_state(), TurnState::Idle);

        sm.begin_text(true).unwrap();
        assert_eq!(sm.turn_state(), TurnState::UserEnded);
    }
}
