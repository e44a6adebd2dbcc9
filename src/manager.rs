//! Registry of live sessions.
//!
//! Keeps the set of open [`Session`]s keyed by a generated id so a host
//! (gateway, bridge) can route traffic to them and tear everything down
//! in one call.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::SessionConfig;
use crate::error::Error;
use crate::session::{Session, DEFAULT_LIVE_URL};

/// Manages active live sessions. Once closed, no further sessions can
/// be opened.
pub struct SessionManager {
    sessions: tokio::sync::Mutex<HashMap<String, Arc<Session>>>,
    closed: parking_lot::Mutex<bool>,
    url: String,
    api_key: String,
}

impl SessionManager {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_url(DEFAULT_LIVE_URL, api_key)
    }

    pub fn with_url(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            closed: parking_lot::Mutex::new(false),
            url: url.into(),
            api_key: api_key.into(),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock()
    }

    /// Connect a new session and register it. Returns the assigned id
    /// and a handle.
    pub async fn open(&self, config: SessionConfig) -> Result<(String, Arc<Session>), Error> {
        if self.is_closed() {
            return Err(Error::ManagerClosed);
        }

        let session = Arc::new(Session::connect_to(&self.url, config, &self.api_key).await?);
        let id = uuid::Uuid::new_v4().to_string();

        let mut sessions = self.sessions.lock().await;
        // Re-check under the registry lock: close_all may have run
        // while we were dialing.
        if self.is_closed() {
            drop(sessions);
            session.close().await;
            return Err(Error::ManagerClosed);
        }
        sessions.insert(id.clone(), Arc::clone(&session));
        tracing::info!(session_id = %id, "live session registered");

        Ok((id, session))
    }

    /// Look up a session by id.
    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Close and deregister one session. Returns false for unknown ids.
    pub async fn close_session(&self, id: &str) -> bool {
        let session = self.sessions.lock().await.remove(id);
        match session {
            Some(session) => {
                session.close().await;
                tracing::info!(session_id = %id, "live session closed");
                true
            }
            None => false,
        }
    }

    /// Number of registered sessions.
    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Close every session and refuse further opens. Idempotent.
    pub async fn close_all(&self) {
        {
            let mut closed = self.closed.lock();
            if *closed {
                return;
            }
            *closed = true;
        }
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (id, session) in sessions {
            session.close().await;
            tracing::debug!(session_id = %id, "live session closed by manager shutdown");
        }
        tracing::info!("session manager closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_manager_refuses_new_sessions() {
        let manager = SessionManager::with_url("ws://127.0.0.1:1", "key");
        manager.close_all().await;
        manager.close_all().await; // idempotent

        let err = manager.open(SessionConfig::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "manager is closed");
        assert_eq!(manager.active_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_session_id_is_not_closed() {
        let manager = SessionManager::with_url("ws://127.0.0.1:1", "key");
        assert!(!manager.close_session("nope").await);
        assert!(manager.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_through_the_manager() {
        let manager = SessionManager::with_url("ws://127.0.0.1:1", "key");
        let config = SessionConfig {
            modalities: vec![
                crate::config::Modality::Text,
                crate::config::Modality::Audio,
            ],
            ..Default::default()
        };
        let err = manager.open(config).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("does not support TEXT and AUDIO simultaneously"));
    }
}
