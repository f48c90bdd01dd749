//! Session store
//!
//! Keyed mapping from session id to `Session`. Writes go through
//! `update` with a mutation closure executed under the per-session lock,
//! so concurrent writers to the same session serialize and no writer loses
//! state. `get_or_create` is atomic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::domain::session::Session;
use crate::error::Result;

/// Boxed read-modify-write closure applied under the session lock.
pub type SessionMutator = Box<dyn FnOnce(&mut Session) + Send>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Snapshot of a session, if present.
    async fn get(&self, id: &str) -> Option<Session>;

    /// Snapshot of the session, creating it first when absent.
    async fn get_or_create(&self, id: &str) -> Session;

    /// Apply a mutation under the session's lock; returns the new snapshot.
    /// The session is created when absent.
    async fn update(&self, id: &str, mutate: SessionMutator) -> Result<Session>;

    /// Remove a session. Returns whether an entry was present.
    async fn delete(&self, id: &str) -> bool;

    /// Ids of all live sessions.
    async fn ids(&self) -> Vec<String>;
}

/// In-memory session store.
///
/// The default backing store; the trait is the seam for swapping in
/// durable storage.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, Arc<Mutex<Session>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &str) -> Arc<Mutex<Session>> {
        self.sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %id, "Creating session");
                Arc::new(Mutex::new(Session::new(id)))
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle for longer than `ttl`.
    pub async fn evict_idle(&self, ttl: Duration) -> usize {
        let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();
        let mut expired = Vec::new();
        for entry in self.sessions.iter() {
            let session = entry.value().lock().await;
            if session.last_active_at < cutoff {
                expired.push(entry.key().clone());
            }
        }
        for id in &expired {
            self.sessions.remove(id);
            debug!(session_id = %id, "Evicted idle session");
        }
        expired.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, id: &str) -> Option<Session> {
        let entry = self.sessions.get(id)?.clone();
        let session = entry.lock().await;
        Some(session.clone())
    }

    async fn get_or_create(&self, id: &str) -> Session {
        let entry = self.entry(id);
        let session = entry.lock().await;
        session.clone()
    }

    async fn update(&self, id: &str, mutate: SessionMutator) -> Result<Session> {
        let entry = self.entry(id);
        let mut session = entry.lock().await;
        mutate(&mut session);
        session.touch();
        Ok(session.clone())
    }

    async fn delete(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    async fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Background TTL sweep. A TTL of zero disables eviction entirely.
pub fn spawn_ttl_sweeper(
    store: Arc<InMemorySessionStore>,
    ttl: Duration,
    interval: Duration,
) -> Option<JoinHandle<()>> {
    if ttl.is_zero() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = store.evict_idle(ttl).await;
            if evicted > 0 {
                info!(count = evicted, "Evicted idle sessions");
            }
        }
    }))
}
