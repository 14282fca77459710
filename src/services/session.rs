//! Session storage: a key-value store with TTL
//!
//! The store is reached through the `SessionStore` trait so the in-memory
//! implementation can be swapped for an external one without touching the
//! handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    pub metadata: Map<String, Value>,
    pub context: Map<String, Value>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session and return its id. A ttl of zero or less means the
    /// session never expires.
    async fn create(
        &self,
        metadata: Option<Map<String, Value>>,
        ttl_secs: Option<i64>,
    ) -> Result<String, AppError>;

    async fn get(&self, id: &str) -> Result<Option<Session>, AppError>;

    /// Merge context and metadata into the session. Returns false when the
    /// session does not exist.
    async fn update(
        &self,
        id: &str,
        context: Option<Map<String, Value>>,
        metadata: Option<Map<String, Value>>,
        extend_ttl: bool,
    ) -> Result<bool, AppError>;

    async fn delete(&self, id: &str) -> Result<bool, AppError>;

    async fn list(&self) -> Result<Vec<String>, AppError>;

    /// Extend the TTL without touching the data.
    async fn heartbeat(&self, id: &str) -> Result<bool, AppError>;

    async fn reap_expired(&self) -> Result<usize, AppError>;

    async fn get_context_value(&self, id: &str, key: &str) -> Result<Option<Value>, AppError> {
        Ok(self
            .get(id)
            .await?
            .and_then(|session| session.context.get(key).cloned()))
    }

    async fn set_context_value(
        &self,
        id: &str,
        key: &str,
        value: Value,
    ) -> Result<bool, AppError> {
        let mut context = Map::new();
        context.insert(key.to_string(), value);
        self.update(id, Some(context), None, true).await
    }
}

struct Entry {
    session: Session,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

pub struct MemorySessionStore {
    default_ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemorySessionStore {
    pub fn new(default_ttl_secs: i64) -> Self {
        Self {
            default_ttl: Duration::seconds(default_ttl_secs),
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn deadline(&self, ttl_secs: Option<i64>) -> Option<DateTime<Utc>> {
        let ttl = ttl_secs
            .map(Duration::seconds)
            .unwrap_or(self.default_ttl);
        (ttl > Duration::zero()).then(|| Utc::now() + ttl)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(
        &self,
        metadata: Option<Map<String, Value>>,
        ttl_secs: Option<i64>,
    ) -> Result<String, AppError> {
        let id = Uuid::new_v4().to_string();
        let session = Session {
            id: id.clone(),
            created_at: Utc::now(),
            last_accessed: None,
            metadata: metadata.unwrap_or_default(),
            context: Map::new(),
        };
        let expires_at = self.deadline(ttl_secs);

        self.entries.write().await.insert(
            id.clone(),
            Entry {
                session,
                expires_at,
            },
        );
        info!(session_id = %id, "created session");
        Ok(id)
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, AppError> {
        let entries = self.entries.read().await;
        let session = entries
            .get(id)
            .filter(|entry| !entry.is_expired(Utc::now()))
            .map(|entry| entry.session.clone());
        Ok(session)
    }

    async fn update(
        &self,
        id: &str,
        context: Option<Map<String, Value>>,
        metadata: Option<Map<String, Value>>,
        extend_ttl: bool,
    ) -> Result<bool, AppError> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let Some(entry) = entries.get_mut(id).filter(|entry| !entry.is_expired(now)) else {
            warn!(session_id = %id, "session not found for update");
            return Ok(false);
        };

        if let Some(context) = context {
            entry.session.context.extend(context);
        }
        if let Some(metadata) = metadata {
            entry.session.metadata.extend(metadata);
        }
        entry.session.last_accessed = Some(now);
        if extend_ttl && self.default_ttl > Duration::zero() {
            entry.expires_at = Some(now + self.default_ttl);
        }
        Ok(true)
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let removed = self.entries.write().await.remove(id).is_some();
        if removed {
            info!(session_id = %id, "deleted session");
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<String>, AppError> {
        let now = Utc::now();
        Ok(self
            .entries
            .read()
            .await
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn heartbeat(&self, id: &str) -> Result<bool, AppError> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let Some(entry) = entries.get_mut(id).filter(|entry| !entry.is_expired(now)) else {
            return Ok(false);
        };
        if self.default_ttl > Duration::zero() {
            entry.expires_at = Some(now + self.default_ttl);
        }
        Ok(true)
    }

    async fn reap_expired(&self) -> Result<usize, AppError> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }
}

/// Periodically drop expired sessions. Spawned once at startup.
pub async fn run_session_reaper(store: Arc<dyn SessionStore>, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match store.reap_expired().await {
            Ok(0) => {}
            Ok(count) => info!(count, "reaped expired sessions"),
            Err(err) => warn!(error = %err, "session reaper pass failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemorySessionStore::new(3600);
        let id = store
            .create(Some(metadata(&[("suite", json!("login"))])), None)
            .await
            .expect("create succeeds");

        let session = store.get(&id).await.expect("get succeeds").expect("session exists");
        assert_eq!(session.id, id);
        assert_eq!(session.metadata["suite"], "login");
        assert!(session.context.is_empty());
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let store = MemorySessionStore::new(3600);
        assert!(store.get("missing").await.expect("get succeeds").is_none());
        assert!(!store.delete("missing").await.expect("delete succeeds"));
        assert!(!store.heartbeat("missing").await.expect("heartbeat succeeds"));
    }

    #[tokio::test]
    async fn update_merges_context_and_metadata() {
        let store = MemorySessionStore::new(3600);
        let id = store.create(None, None).await.expect("create succeeds");

        let updated = store
            .update(
                &id,
                Some(metadata(&[("device", json!("sim-1"))])),
                Some(metadata(&[("owner", json!("ci"))])),
                true,
            )
            .await
            .expect("update succeeds");
        assert!(updated);

        let session = store.get(&id).await.expect("get succeeds").expect("session exists");
        assert_eq!(session.context["device"], "sim-1");
        assert_eq!(session.metadata["owner"], "ci");
        assert!(session.last_accessed.is_some());
    }

    #[tokio::test]
    async fn context_value_helpers() {
        let store = MemorySessionStore::new(3600);
        let id = store.create(None, None).await.expect("create succeeds");

        assert!(store
            .set_context_value(&id, "step", json!(3))
            .await
            .expect("set succeeds"));
        assert_eq!(
            store
                .get_context_value(&id, "step")
                .await
                .expect("get succeeds"),
            Some(json!(3))
        );
        assert_eq!(
            store
                .get_context_value(&id, "missing")
                .await
                .expect("get succeeds"),
            None
        );
    }

    #[tokio::test]
    async fn expired_sessions_are_invisible_and_reaped() {
        // A negative default TTL makes every entry born expired.
        let store = MemorySessionStore::new(-1);
        let id = store.create(None, None).await.expect("create succeeds");

        assert!(store.get(&id).await.expect("get succeeds").is_none());
        assert!(store.list().await.expect("list succeeds").is_empty());
        assert_eq!(store.reap_expired().await.expect("reap succeeds"), 1);
        assert_eq!(store.reap_expired().await.expect("reap succeeds"), 0);
    }

    #[tokio::test]
    async fn zero_ttl_means_no_expiry() {
        let store = MemorySessionStore::new(-1);
        let id = store
            .create(None, Some(0))
            .await
            .expect("create succeeds");

        assert!(store.get(&id).await.expect("get succeeds").is_some());
        assert_eq!(store.reap_expired().await.expect("reap succeeds"), 0);
    }

    #[tokio::test]
    async fn list_contains_created_sessions() {
        let store = MemorySessionStore::new(3600);
        let a = store.create(None, None).await.expect("create succeeds");
        let b = store.create(None, None).await.expect("create succeeds");

        let mut listed = store.list().await.expect("list succeeds");
        listed.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(listed, expected);
    }
}
