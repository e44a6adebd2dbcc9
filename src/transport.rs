//! WebSocket transport for the Gemini Live connection.
//!
//! Wraps a split tokio-tungstenite stream behind a send/receive surface
//! the session can drive from separate tasks. Sends are serialized
//! through the sink mutex (one message in flight at a time); receives
//! are cancellable through the session scope. The transport never
//! parses JSON: it hands raw frame bytes up to the codec.
//!
//! The Live API delivers all messages as Binary frames, JSON included,
//! so `receive` treats text and binary identically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Largest inbound message accepted before the transport errors (16 MiB).
pub const MAX_INBOUND_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One live WebSocket connection. Replaced wholesale on reconnect; a
/// transport is never re-dialed in place.
pub struct ConnTransport {
    sink: tokio::sync::Mutex<Option<SplitSink<WsStream, WsMessage>>>,
    stream: tokio::sync::Mutex<Option<SplitStream<WsStream>>>,
    closed: AtomicBool,
}

impl ConnTransport {
    /// Dial the endpoint with the API key in the auth header.
    pub async fn connect(url: &str, api_key: &str) -> Result<Self, Error> {
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::ConnectFailed(e.to_string()))?;
        request.headers_mut().insert(
            "x-goog-api-key",
            api_key
                .parse()
                .map_err(|_| Error::ConnectFailed("invalid api key header value".to_string()))?,
        );

        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(MAX_INBOUND_MESSAGE_BYTES))
            .max_frame_size(Some(MAX_INBOUND_MESSAGE_BYTES));

        let (ws, _response) =
            tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false)
                .await
                .map_err(|e| Error::ConnectFailed(e.to_string()))?;

        let (sink, stream) = ws.split();
        Ok(Self {
            sink: tokio::sync::Mutex::new(Some(sink)),
            stream: tokio::sync::Mutex::new(Some(stream)),
            closed: AtomicBool::new(false),
        })
    }

    /// Serialize and send one message. Blocks the caller until the frame
    /// is written; concurrent senders queue on the sink mutex.
    pub async fn send_json<T: Serialize>(&self, msg: &T) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        let json = serde_json::to_string(msg).map_err(|e| Error::ProtocolParse(e.to_string()))?;

        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(Error::NotConnected)?;
        sink.send(WsMessage::Text(json.into()))
            .await
            .map_err(classify_ws_error)
    }

    /// Receive the raw bytes of the next data frame. Control frames are
    /// absorbed (tungstenite answers pings internally). Returns
    /// `SessionClosed` when the token fires first.
    pub async fn receive(&self, cancel: &CancellationToken) -> Result<Vec<u8>, Error> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(Error::NotConnected)?;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::SessionClosed),
                frame = stream.next() => match frame {
                    None => return Err(Error::TransportDropped("stream ended".to_string())),
                    Some(Err(e)) => return Err(classify_ws_error(e)),
                    Some(Ok(WsMessage::Text(text))) => return Ok(text.as_bytes().to_vec()),
                    Some(Ok(WsMessage::Binary(data))) => return Ok(data.to_vec()),
                    Some(Ok(WsMessage::Close(frame))) => {
                        return Err(Error::TransportDropped(match frame {
                            Some(frame) => format!("closed by server: {frame:?}"),
                            None => "closed by server".to_string(),
                        }));
                    }
                    Some(Ok(_)) => continue,
                },
            }
        }
    }

    /// Send a WebSocket ping.
    pub async fn ping(&self) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::NotConnected);
        }
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(Error::NotConnected)?;
        sink.send(WsMessage::Ping(Vec::new().into()))
            .await
            .map_err(classify_ws_error)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Graceful close. Idempotent: only the first call sends the close
    /// frame. The receive side observes the close handshake and drops
    /// its half on its own.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(WsMessage::Close(None)).await;
            let _ = sink.flush().await;
        }
    }

    /// Discard the socket without a close handshake. Used when the
    /// connection is already known dead and a fresh dial follows.
    pub async fn reset(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.sink.lock().await.take();
        self.stream.lock().await.take();
    }

    /// Spawn the keepalive task: pings at `interval` until the token is
    /// cancelled or a ping fails.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the connection is fresh.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = transport.ping().await {
                            tracing::debug!(error = %e, "heartbeat ping failed, stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn classify_ws_error(e: tokio_tungstenite::tungstenite::Error) -> Error {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            Error::TransportDropped("connection closed".to_string())
        }
        WsError::Io(io)
            if io.kind() == std::io::ErrorKind::TimedOut
                || io.kind() == std::io::ErrorKind::WouldBlock =>
        {
            Error::TransportTimeout
        }
        other => Error::TransportDropped(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inert_transport() -> ConnTransport {
        ConnTransport {
            sink: tokio::sync::Mutex::new(None),
            stream: tokio::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn send_on_reset_transport_fails_not_connected() {
        let transport = inert_transport();
        let err = transport
            .send_json(&serde_json::json!({"x": 1}))
            .await
            .unwrap_err();
        assert_eq!(err, Error::NotConnected);
    }

    #[tokio::test]
    async fn receive_on_reset_transport_fails_not_connected() {
        let transport = inert_transport();
        let cancel = CancellationToken::new();
        let err = transport.receive(&cancel).await.unwrap_err();
        assert_eq!(err, Error::NotConnected);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = inert_transport();
        transport.close().await;
        transport.close().await;
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let transport = inert_transport();
        transport.close().await;
        let err = transport.ping().await.unwrap_err();
        assert_eq!(err, Error::NotConnected);
    }

    #[test]
    fn timeout_io_errors_classify_as_timeout() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let err = classify_ws_error(tokio_tungstenite::tungstenite::Error::Io(io));
        assert_eq!(err, Error::TransportTimeout);
    }

    #[test]
    fn closed_connection_classifies_as_dropped() {
        let err = classify_ws_error(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
        assert!(matches!(err, Error::TransportDropped(_)));
    }
}
