//! Session-keyed context store
//!
//! One `tokio::sync::Mutex` per session serializes turns for that session;
//! the outer map lock is only held for lookups and inserts.

use crate::config::AgentConfig;
use crate::error::OrchestrationError;
use crate::memory::session::{SessionContext, Turn};
use crate::models::{Query, ResponseEnvelope};
use crate::Result;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const MAX_SESSION_ID_LEN: usize = 128;

/// Exclusive access to one session for the duration of a turn
pub type SessionGuard = OwnedMutexGuard<SessionContext>;

type SessionHandle = Arc<Mutex<SessionContext>>;

pub struct ContextStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    window: usize,
    idle_timeout: Duration,
}

/// Reject empty, oversized or oddly-charactered session ids.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(OrchestrationError::InvalidSession(
            "session id is empty".to_string(),
        ));
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(OrchestrationError::InvalidSession(format!(
            "session id exceeds {} characters",
            MAX_SESSION_ID_LEN
        )));
    }
    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'))
    {
        return Err(OrchestrationError::InvalidSession(format!(
            "session id {:?} contains unsupported characters",
            session_id
        )));
    }
    Ok(())
}

impl ContextStore {
    pub fn new(window: usize, idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            window: window.max(1),
            idle_timeout,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(config.history_window, config.session_idle_timeout)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    async fn handle(&self, session_id: &str) -> SessionHandle {
        {
            let sessions = self.sessions.read().await;
            if let Some(handle) = sessions.get(session_id) {
                return Arc::clone(handle);
            }
        }

        let mut sessions = self.sessions.write().await;
        let handle = sessions.entry(session_id.to_string()).or_insert_with(|| {
            debug!(session_id = %session_id, "Creating session context");
            Arc::new(Mutex::new(SessionContext::new(session_id)))
        });
        Arc::clone(handle)
    }

    /// Wait for exclusive access to a session, creating it on first use.
    pub async fn lock(&self, session_id: &str) -> Result<SessionGuard> {
        validate_session_id(session_id)?;

        loop {
            let handle = self.handle(session_id).await;
            let mut guard = Arc::clone(&handle).lock_owned().await;

            // The session may have been evicted while we waited.
            let still_current = {
                let sessions = self.sessions.read().await;
                sessions
                    .get(session_id)
                    .is_some_and(|current| Arc::ptr_eq(current, &handle))
            };
            if still_current {
                guard.touch();
                return Ok(guard);
            }
        }
    }

    /// Snapshot of the session, created if absent
    pub async fn get_or_create(&self, session_id: &str) -> Result<SessionContext> {
        let guard = self.lock(session_id).await?;
        Ok(guard.clone())
    }

    pub async fn append(&self, session_id: &str, query: Query, response: ResponseEnvelope) -> Result<()> {
        let mut guard = self.lock(session_id).await?;
        guard.append_turn(Turn { query, response }, self.window);
        Ok(())
    }

    /// Remove a session; returns whether it existed.
    pub async fn evict(&self, session_id: &str) -> Result<bool> {
        validate_session_id(session_id)?;
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(session_id).is_some())
    }

    /// Drop sessions idle for longer than the timeout. Busy sessions stay.
    pub async fn evict_idle(&self) -> usize {
        let Ok(idle) = chrono::Duration::from_std(self.idle_timeout) else {
            return 0;
        };
        let now = Utc::now();

        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, handle| {
            let keep = match handle.try_lock() {
                Ok(ctx) => now.signed_duration_since(ctx.last_active) <= idle,
                Err(_) => true,
            };
            keep
        });
        let evicted = before - sessions.len();

        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Periodically evict idle sessions until the handle is aborted.
    pub fn spawn_janitor(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                self.evict_idle().await;
            }
        })
    }
}
