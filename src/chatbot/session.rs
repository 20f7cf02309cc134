//! Per-sender sessions gating the first-contact menu.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub sender: String,
    /// When the first message from this sender arrived. Never refreshed.
    pub first_seen: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Record the sender if unknown. Returns true only for the first call per sender.
    async fn begin(&self, sender: &str) -> bool;

    async fn get(&self, sender: &str) -> Option<Session>;

    /// Drop the sender so the next message counts as first contact again.
    async fn forget(&self, sender: &str);
}

/// Sessions held in memory; lost on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn begin(&self, sender: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(sender) {
            return false;
        }
        sessions.insert(
            sender.to_string(),
            Session {
                sender: sender.to_string(),
                first_seen: Utc::now(),
            },
        );
        true
    }

    async fn get(&self, sender: &str) -> Option<Session> {
        self.sessions.lock().await.get(sender).cloned()
    }

    async fn forget(&self, sender: &str) {
        self.sessions.lock().await.remove(sender);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_begin_only_once_per_sender() {
        let store = MemorySessionStore::new();
        assert!(store.begin("6281111").await);
        assert!(!store.begin("6281111").await);
        assert!(store.begin("6282222").await);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_first_seen_not_refreshed() {
        let store = MemorySessionStore::new();
        let before = Utc::now();
        store.begin("6281111").await;
        let first = store.get("6281111").await.unwrap();
        assert!(first.first_seen >= before);

        store.begin("6281111").await;
        assert_eq!(store.get("6281111").await.unwrap(), first);
        assert!(store.get("6289999").await.is_none());
    }

    #[tokio::test]
    async fn test_forget_allows_new_begin() {
        let store = MemorySessionStore::new();
        assert!(store.begin("6281111").await);
        store.forget("6281111").await;
        assert!(store.get("6281111").await.is_none());
        assert!(store.begin("6281111").await);

        // Unknown sender is a no-op
        store.forget("6289999").await;
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_begin_single_winner() {
        let store = Arc::new(MemorySessionStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.begin("6281111").await }));
        }

        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
