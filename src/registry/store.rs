//! Coordination store abstraction.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Lease identifier issued by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i64);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// A change under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: String },
    Delete { key: String },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => key,
        }
    }
}

/// Ordered event stream. An `Err` item means events may have been missed;
/// the watcher must re-list before trusting its view again.
pub type WatchStream = BoxStream<'static, Result<WatchEvent, StoreError>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),
    #[error("store unreachable: {0}")]
    Unavailable(String),
    #[error("watch lagged behind by {0} events")]
    Lagged(u64),
    #[error("unexpected store response: {0}")]
    Protocol(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Key/value store with TTL leases and prefix watches (etcd semantics).
#[async_trait]
pub trait CoordinationStore: Send + Sync + std::fmt::Debug + 'static {
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// Refresh a lease to its full TTL. Fails with `LeaseNotFound` once expired.
    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError>;

    /// Revoke a lease, deleting every key attached to it.
    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError>;

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<(), StoreError>;

    /// All live entries under `prefix`, ordered by key.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    /// Changes under `prefix` from now on. Expired leases emit deletes.
    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream, StoreError>;
}
