//! Error taxonomy for the Gemini Live client.
//!
//! Every failure surfaced at the crate boundary is one of these variants.
//! Display strings are part of the public contract: callers (and tests)
//! match on them, so they must stay stable across releases.
//!
//! Classification groups:
//! - configuration (`ConfigInvalid`) — rejected before any I/O
//! - connection (`ConnectFailed`, `HandshakeTimeout`, `HandshakeInvalid`)
//! - transport (`TransportDropped`, `TransportTimeout`, `WebSocket`)
//! - protocol (`ProtocolParse`)
//! - provider verdicts on the non-streaming path (`MaxTokensReached`,
//!   `SafetyBlocked`, `RecitationBlocked`, `EmptyCandidate`, `NoCandidates`)
//! - lifecycle sentinels (`SessionClosed`, `NotConnected`, `ManagerClosed`)

use thiserror::Error;

/// All errors produced by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Configuration rejected before any I/O was attempted.
    #[error("{0}")]
    ConfigInvalid(String),

    /// WebSocket dial failed.
    #[error("failed to connect to Gemini Live: {0}")]
    ConnectFailed(String),

    /// Server did not acknowledge the setup message in time.
    #[error("Gemini Live setupComplete timeout (10s)")]
    HandshakeTimeout,

    /// Server's first message was not `setupComplete`.
    #[error("invalid Gemini Live handshake: {0}")]
    HandshakeInvalid(String),

    /// The connection dropped (EOF, close frame, reset).
    #[error("transport dropped: {0}")]
    TransportDropped(String),

    /// A transport-level read or write timed out.
    #[error("transport timeout")]
    TransportTimeout,

    /// A server frame could not be parsed as a protocol message.
    #[error("failed to parse server message: {0}")]
    ProtocolParse(String),

    /// Terminal WebSocket failure, wrapped for the session error slot.
    #[error("gemini websocket error: {0}")]
    WebSocket(String),

    /// Non-success HTTP status from the generateContent endpoint.
    #[error("Gemini API error {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Candidate hit the output token limit.
    #[error("gemini returned MAX_TOKENS error (this should not happen with reasonable limits)")]
    MaxTokensReached,

    /// Response withheld by safety filters.
    #[error("response blocked by Gemini safety filters")]
    SafetyBlocked,

    /// Response withheld over recitation concerns.
    #[error("response blocked due to recitation concerns")]
    RecitationBlocked,

    /// Candidate arrived with no parts and an unrecognized finish reason.
    #[error("no parts in Gemini candidate (finish reason: {0})")]
    EmptyCandidate(String),

    /// Response carried zero candidates.
    #[error("no candidates in Gemini response")]
    NoCandidates,

    /// Operation attempted on a closed session.
    #[error("session is closed")]
    SessionClosed,

    /// Operation attempted on a transport with no live socket.
    #[error("not connected")]
    NotConnected,

    /// Operation attempted on a shut-down session manager.
    #[error("manager is closed")]
    ManagerClosed,
}

impl Error {
    /// Whether a mid-session failure should trigger reconnection.
    ///
    /// Timeouts are excluded: a caller-driven timeout usually means the
    /// caller gave up, not that the link died.
    pub fn is_reconnectable(&self) -> bool {
        matches!(self, Error::TransportDropped(_) | Error::WebSocket(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_strings_are_stable() {
        assert_eq!(Error::SessionClosed.to_string(), "session is closed");
        assert_eq!(Error::NotConnected.to_string(), "not connected");
        assert_eq!(Error::ManagerClosed.to_string(), "manager is closed");
    }

    #[test]
    fn provider_strings_are_stable() {
        assert_eq!(
            Error::MaxTokensReached.to_string(),
            "gemini returned MAX_TOKENS error (this should not happen with reasonable limits)"
        );
        assert_eq!(
            Error::SafetyBlocked.to_string(),
            "response blocked by Gemini safety filters"
        );
        assert_eq!(
            Error::RecitationBlocked.to_string(),
            "response blocked due to recitation concerns"
        );
        assert_eq!(
            Error::EmptyCandidate("OTHER".into()).to_string(),
            "no parts in Gemini candidate (finish reason: OTHER)"
        );
    }

    #[test]
    fn websocket_errors_are_wrapped() {
        let err = Error::WebSocket("unexpected EOF".into());
        assert_eq!(err.to_string(), "gemini websocket error: unexpected EOF");
    }

    #[test]
    fn reconnect_classification() {
        assert!(Error::TransportDropped("eof".into()).is_reconnectable());
        assert!(Error::WebSocket("reset".into()).is_reconnectable());
        assert!(!Error::TransportTimeout.is_reconnectable());
        assert!(!Error::SessionClosed.is_reconnectable());
    }
}
