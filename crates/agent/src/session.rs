//! Per-user runtime sessions: bounded in-memory history, the pending
//! dialogue, and idle eviction. Sessions are hints, not the source of truth;
//! the durable conversation log lives in the database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use majordome_core::config::SessionConfig;
use majordome_core::dialogue::Dialogue;
use majordome_core::MessageRole;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: MessageRole,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub history: Vec<HistoryEntry>,
    pub dialogue: Option<Dialogue>,
    pub error_count: u32,
}

impl Session {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            created_at: now,
            last_activity: now,
            history: Vec::new(),
            dialogue: None,
            error_count: 0,
        }
    }

    pub fn push_history(
        &mut self,
        role: MessageRole,
        content: impl Into<String>,
        at: DateTime<Utc>,
        limit: usize,
    ) {
        self.history.push(HistoryEntry { role, content: content.into(), at });
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
    }

    /// Content of the most recent user entry, for duplicate-echo detection.
    pub fn last_user_message(&self) -> Option<&str> {
        self.history
            .iter()
            .rev()
            .find(|entry| entry.role == MessageRole::User)
            .map(|entry| entry.content.as_str())
    }

    pub fn has_active_dialogue(&self) -> bool {
        self.dialogue.as_ref().is_some_and(|dialogue| dialogue.state.is_active())
    }
}

/// Seam to a shared cache for horizontally scaled instances. Writes are
/// last-writer-wins; the durable log is the source of truth.
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn load(&self, user_id: &str) -> Option<Session>;
    async fn store(&self, session: &Session);
    async fn remove(&self, user_id: &str);
}

#[derive(Default)]
pub struct InMemorySessionCache {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for InMemorySessionCache {
    async fn load(&self, user_id: &str) -> Option<Session> {
        self.sessions.lock().await.get(user_id).cloned()
    }

    async fn store(&self, session: &Session) {
        self.sessions.lock().await.insert(session.user_id.clone(), session.clone());
    }

    async fn remove(&self, user_id: &str) {
        self.sessions.lock().await.remove(user_id);
    }
}

pub struct SessionStore {
    local: Mutex<HashMap<String, Session>>,
    cache: std::sync::Arc<dyn SessionCache>,
    idle_timeout: Duration,
    history_limit: usize,
}

impl SessionStore {
    pub fn new(cache: std::sync::Arc<dyn SessionCache>, config: &SessionConfig) -> Self {
        Self {
            local: Mutex::new(HashMap::new()),
            cache,
            idle_timeout: Duration::seconds(config.idle_timeout_secs.max(1) as i64),
            history_limit: config.history_limit.max(1),
        }
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Load the user's session, falling back to the shared cache, or create
    /// a fresh one. A session idle beyond the timeout is evicted and
    /// replaced with a new session id.
    pub async fn load_or_create(&self, user_id: &str, now: DateTime<Utc>) -> Session {
        let mut local = self.local.lock().await;
        let existing = match local.get(user_id) {
            Some(session) => Some(session.clone()),
            None => self.cache.load(user_id).await,
        };

        match existing {
            Some(session) if now - session.last_activity <= self.idle_timeout => session,
            Some(expired) => {
                local.remove(user_id);
                self.cache.remove(user_id).await;
                tracing::debug!(
                    event_name = "session.evicted",
                    user_id = %user_id,
                    session_id = %expired.id,
                    "idle session evicted"
                );
                Session::new(user_id, now)
            }
            None => Session::new(user_id, now),
        }
    }

    /// Write the session back to the local map and the shared cache.
    pub async fn persist(&self, session: Session) {
        self.cache.store(&session).await;
        self.local.lock().await.insert(session.user_id.clone(), session);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};

    use majordome_core::config::SessionConfig;
    use majordome_core::MessageRole;

    use super::{InMemorySessionCache, Session, SessionStore};

    fn store(idle_timeout_secs: u64) -> SessionStore {
        SessionStore::new(
            Arc::new(InMemorySessionCache::new()),
            &SessionConfig { idle_timeout_secs, history_limit: 3, cache_url: None },
        )
    }

    #[tokio::test]
    async fn sessions_survive_within_the_idle_window() {
        let store = store(3600);
        let now = Utc::now();

        let session = store.load_or_create("u-1", now).await;
        let id = session.id.clone();
        store.persist(session).await;

        let reloaded = store.load_or_create("u-1", now + Duration::seconds(30)).await;
        assert_eq!(reloaded.id, id);
    }

    #[tokio::test]
    async fn idle_sessions_are_replaced_with_a_fresh_id() {
        let store = store(60);
        let now = Utc::now();

        let session = store.load_or_create("u-1", now).await;
        let old_id = session.id.clone();
        store.persist(session).await;

        let fresh = store.load_or_create("u-1", now + Duration::seconds(120)).await;
        assert_ne!(fresh.id, old_id);
        assert!(fresh.history.is_empty());
    }

    #[tokio::test]
    async fn sessions_are_shared_through_the_cache() {
        let cache = Arc::new(InMemorySessionCache::new());
        let config = SessionConfig { idle_timeout_secs: 3600, history_limit: 3, cache_url: None };
        let first_instance = SessionStore::new(cache.clone(), &config);
        let second_instance = SessionStore::new(cache, &config);
        let now = Utc::now();

        let session = first_instance.load_or_create("u-1", now).await;
        let id = session.id.clone();
        first_instance.persist(session).await;

        let seen_elsewhere = second_instance.load_or_create("u-1", now).await;
        assert_eq!(seen_elsewhere.id, id);
    }

    #[test]
    fn history_is_bounded_and_tracks_the_last_user_message() {
        let now = Utc::now();
        let mut session = Session::new("u-1", now);
        for index in 0..5 {
            session.push_history(MessageRole::User, format!("message {index}"), now, 3);
            session.push_history(MessageRole::Assistant, format!("réponse {index}"), now, 3);
        }

        assert_eq!(session.history.len(), 3);
        assert_eq!(session.last_user_message(), Some("message 4"));
    }
}
