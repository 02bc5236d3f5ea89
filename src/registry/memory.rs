//! In-process coordination store.
//!
//! Same contract as etcd: TTL leases, keys bound to leases, prefix watches
//! that see a delete when a lease expires. Used by tests and single-host
//! deployments where server and clients share one process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::registry::store::{
    CoordinationStore, KeyValue, LeaseId, StoreError, WatchEvent, WatchStream,
};

const DEFAULT_REAP_INTERVAL: Duration = Duration::from_millis(100);
const EVENT_BUFFER: usize = 1024;

#[derive(Debug)]
struct Entry {
    value: String,
    lease: Option<LeaseId>,
}

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    next_lease: i64,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<State>,
    events: broadcast::Sender<WatchEvent>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // No code path panics while holding the lock; recover the data if one ever does.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: WatchEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Drop expired leases and their keys. Must be called with the lock held
    /// so deletes are emitted in order with other mutations.
    fn purge_expired(&self, state: &mut State, now: Instant) {
        let expired: Vec<LeaseId> = state
            .leases
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            state.leases.remove(&id);
            tracing::debug!(lease = %id, "Lease expired");
            self.delete_lease_keys(state, id);
        }
    }

    fn delete_lease_keys(&self, state: &mut State, id: LeaseId) {
        let keys: Vec<String> = state
            .entries
            .iter()
            .filter(|(_, entry)| entry.lease == Some(id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            state.entries.remove(&key);
            self.emit(WatchEvent::Delete { key });
        }
    }
}

/// Cheaply cloneable handle to one in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store with the default expiry reaper. Must be called inside a Tokio runtime.
    pub fn new() -> Self {
        Self::with_reap_interval(DEFAULT_REAP_INTERVAL)
    }

    pub fn with_reap_interval(interval: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                next_lease: 1,
                ..Default::default()
            }),
            events,
        });
        tokio::spawn(reap(Arc::downgrade(&shared), interval));
        Self { shared }
    }

    pub fn lease_count(&self) -> usize {
        let mut state = self.shared.lock();
        self.shared.purge_expired(&mut state, Instant::now());
        state.leases.len()
    }
}

/// Expire leases even when nobody touches the store. Exits once the store is dropped.
async fn reap(shared: Weak<Shared>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let mut state = shared.lock();
        shared.purge_expired(&mut state, Instant::now());
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        let mut state = self.shared.lock();
        let id = LeaseId(state.next_lease);
        state.next_lease += 1;
        state.leases.insert(
            id,
            Lease {
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut state = self.shared.lock();
        self.shared.purge_expired(&mut state, now);
        let entry = state
            .leases
            .get_mut(&lease)
            .ok_or(StoreError::LeaseNotFound(lease))?;
        entry.expires_at = now + entry.ttl;
        Ok(())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
        let mut state = self.shared.lock();
        self.shared.purge_expired(&mut state, Instant::now());
        if state.leases.remove(&lease).is_none() {
            return Err(StoreError::LeaseNotFound(lease));
        }
        self.shared.delete_lease_keys(&mut state, lease);
        Ok(())
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<(), StoreError> {
        let mut state = self.shared.lock();
        self.shared.purge_expired(&mut state, Instant::now());
        if let Some(id) = lease {
            if !state.leases.contains_key(&id) {
                return Err(StoreError::LeaseNotFound(id));
            }
        }
        state.entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                lease,
            },
        );
        self.shared.emit(WatchEvent::Put {
            key: key.to_owned(),
            value: value.to_owned(),
        });
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        let mut state = self.shared.lock();
        self.shared.purge_expired(&mut state, Instant::now());
        Ok(state
            .entries
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
            })
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream, StoreError> {
        let rx = self.shared.events.subscribe();
        let prefix = prefix.to_owned();
        let events = stream::unfold((rx, prefix), |(mut rx, prefix)| async move {
            loop {
                match rx.recv().await {
                    Ok(event) if event.key().starts_with(&prefix) => {
                        return Some((Ok(event), (rx, prefix)));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        return Some((Err(StoreError::Lagged(n)), (rx, prefix)));
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(events.boxed())
    }
}
