//! In-memory registry of live sessions.
//!
//! An entry exists from admission until its stream delivers `end` or the
//! session outlives its TTL. The registry never touches durable data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{debug, info};

use crate::events::{channel, EventSink, Phase, SharedReceiver};

struct SessionEntry {
    client_key: String,
    url: String,
    created_at: DateTime<Utc>,
    started: Instant,
    phase: Arc<RwLock<Phase>>,
    receiver: SharedReceiver,
    task: Option<AbortHandle>,
}

/// Snapshot of a session for status queries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub client_key: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub phase: Phase,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return the writing end of its queue.
    pub fn create(&self, id: &str, client_key: &str, url: &str) -> EventSink {
        let phase = Arc::new(RwLock::new(Phase::Scraping));
        let (sink, receiver) = channel(id, phase.clone());
        self.sessions.write().insert(
            id.to_string(),
            SessionEntry {
                client_key: client_key.to_string(),
                url: url.to_string(),
                created_at: Utc::now(),
                started: Instant::now(),
                phase,
                receiver,
                task: None,
            },
        );
        debug!(session = %id, "Session registered");
        sink
    }

    /// Attach the background task driving `id`.
    pub fn attach_task(&self, id: &str, task: AbortHandle) {
        if let Some(entry) = self.sessions.write().get_mut(id) {
            entry.task = Some(task);
        }
    }

    pub fn get(&self, id: &str) -> Option<SessionInfo> {
        self.sessions.read().get(id).map(|entry| SessionInfo {
            id: id.to_string(),
            client_key: entry.client_key.clone(),
            url: entry.url.clone(),
            created_at: entry.created_at,
            phase: *entry.phase.read(),
        })
    }

    pub fn receiver(&self, id: &str) -> Option<SharedReceiver> {
        self.sessions.read().get(id).map(|entry| entry.receiver.clone())
    }

    pub fn phase(&self, id: &str) -> Option<Phase> {
        self.sessions.read().get(id).map(|entry| *entry.phase.read())
    }

    /// Whether the pipeline of `id` has not reached a terminal phase.
    pub fn is_running(&self, id: &str) -> bool {
        self.sessions.read().get(id).is_some_and(|entry| {
            !entry.phase.read().is_terminal() && entry.task.as_ref().map_or(true, |t| !t.is_finished())
        })
    }

    /// Forget `id`. The pipeline task keeps running if it has not finished.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().remove(id).is_some();
        if removed {
            debug!(session = %id, "Session evicted");
        }
        removed
    }

    /// Evict sessions older than `ttl`, aborting their tasks. Returns the
    /// evicted ids.
    pub fn purge_expired(&self, ttl: Duration) -> Vec<String> {
        let mut sessions = self.sessions.write();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| entry.started.elapsed() >= ttl)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            if let Some(entry) = sessions.remove(id) {
                if let Some(task) = entry.task {
                    task.abort();
                }
            }
        }
        if !expired.is_empty() {
            info!("Evicted {} expired sessions", expired.len());
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_phase_follows_sink() {
        let registry = SessionRegistry::new();
        let sink = registry.create("s1", "10.0.0.1", "https://a.dev");
        assert_eq!(registry.phase("s1"), Some(Phase::Scraping));
        assert!(registry.is_running("s1"));

        sink.status(Phase::Deploying, "sandbox");
        assert_eq!(registry.get("s1").unwrap().phase, Phase::Deploying);

        sink.done("/api/sandbox/s1/", Vec::new());
        assert!(!registry.is_running("s1"));
    }

    #[tokio::test]
    async fn test_purge_aborts_task() {
        let registry = SessionRegistry::new();
        let _sink = registry.create("old", "k", "https://a.dev");
        let task = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        registry.attach_task("old", task.abort_handle());

        assert!(registry.purge_expired(Duration::from_secs(60)).is_empty());
        assert_eq!(registry.purge_expired(Duration::ZERO), vec!["old".to_string()]);
        assert!(registry.is_empty());
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_remove_unknown() {
        let registry = SessionRegistry::new();
        assert!(!registry.remove("nope"));
        assert!(registry.receiver("nope").is_none());
    }
}
