//! Client-side resolution.
//!
//! `resolve` is a one-shot listing. `subscribe` keeps a versioned set fed
//! from the store's watch stream; readers load it lock-free through
//! `ArcSwap` and can await `changed()` for new versions.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::registry::store::{WatchEvent, WatchStream};
use crate::registry::{NamingRecord, Registry, RegistryError};
use crate::resilience::Backoff;

/// Snapshot of the addresses currently registered for a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpointSet {
    pub service: String,
    /// Sorted and free of duplicates.
    pub addresses: Vec<String>,
    /// Bumped on every change; 0 means nothing resolved yet.
    pub version: u64,
}

impl ResolvedEndpointSet {
    pub fn empty(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            addresses: Vec::new(),
            version: 0,
        }
    }

    pub fn contains(&self, address: &str) -> bool {
        self.addresses.binary_search_by(|a| a.as_str().cmp(address)).is_ok()
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    registry: Registry,
    reconnect_base: Duration,
    reconnect_max: Duration,
}

impl Resolver {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            reconnect_base: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(5),
        }
    }

    /// Backoff bounds for re-establishing a broken watch.
    pub fn with_reconnect_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_max = max;
        self
    }

    pub async fn resolve(&self, service: &str) -> Result<ResolvedEndpointSet, RegistryError> {
        let prefix = self.registry.service_prefix(service);
        let entries = list(&self.registry, &prefix).await?;
        Ok(ResolvedEndpointSet {
            service: service.to_owned(),
            addresses: addresses(&entries),
            version: 1,
        })
    }

    /// Resolve `service` and keep following it. Fails only if the initial
    /// listing fails; later store errors leave the last set in place.
    pub async fn subscribe(&self, service: &str) -> Result<ResolverWatch, RegistryError> {
        let prefix = self.registry.service_prefix(service);
        let (stream, entries) = connect(&self.registry, &prefix).await?;

        let initial = ResolvedEndpointSet {
            service: service.to_owned(),
            addresses: addresses(&entries),
            version: 1,
        };
        tracing::info!(
            service,
            endpoints = initial.addresses.len(),
            "Resolver subscribed"
        );

        let current = Arc::new(ArcSwap::from_pointee(initial));
        let (version_tx, version_rx) = watch::channel(1);

        let follower = Follower {
            registry: self.registry.clone(),
            service: service.to_owned(),
            prefix,
            entries,
            current: Arc::clone(&current),
            version_tx,
            backoff: Backoff::new(self.reconnect_base, self.reconnect_max),
        };
        let task = tokio::spawn(follower.run(stream));

        Ok(ResolverWatch {
            current,
            version_rx,
            _task: Arc::new(AbortOnDrop(task)),
        })
    }
}

/// Watch first, then list, so no change between the two is lost.
async fn connect(
    registry: &Registry,
    prefix: &str,
) -> Result<(WatchStream, BTreeMap<String, String>), RegistryError> {
    let stream = registry.store().watch_prefix(prefix).await?;
    let entries = list(registry, prefix).await?;
    Ok((stream, entries))
}

async fn list(registry: &Registry, prefix: &str) -> Result<BTreeMap<String, String>, RegistryError> {
    let kvs = registry.store().get_prefix(prefix).await?;
    Ok(kvs
        .into_iter()
        .map(|kv| {
            let address = address_of(prefix, &kv.key, &kv.value);
            (kv.key, address)
        })
        .collect())
}

/// The record's `Addr`, or the key suffix if the value is not a naming record.
fn address_of(prefix: &str, key: &str, value: &str) -> String {
    match serde_json::from_str::<NamingRecord>(value) {
        Ok(record) if !record.addr.is_empty() => record.addr,
        _ => key.strip_prefix(prefix).unwrap_or(key).to_owned(),
    }
}

fn addresses(entries: &BTreeMap<String, String>) -> Vec<String> {
    let mut addresses: Vec<String> = entries.values().cloned().collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

struct Follower {
    registry: Registry,
    service: String,
    prefix: String,
    /// key → address
    entries: BTreeMap<String, String>,
    current: Arc<ArcSwap<ResolvedEndpointSet>>,
    version_tx: watch::Sender<u64>,
    backoff: Backoff,
}

impl Follower {
    async fn run(mut self, mut stream: WatchStream) {
        loop {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(event) => {
                        self.apply(event);
                        self.publish();
                    }
                    Err(e) => {
                        tracing::warn!(service = %self.service, error = %e, "Watch interrupted");
                        break;
                    }
                }
            }
            stream = self.reconnect().await;
        }
    }

    fn apply(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Put { key, value } => {
                let address = address_of(&self.prefix, &key, &value);
                self.entries.insert(key, address);
            }
            WatchEvent::Delete { key } => {
                self.entries.remove(&key);
            }
        }
    }

    /// Re-open the watch and re-list until both succeed. The last set stays
    /// visible to readers meanwhile.
    async fn reconnect(&mut self) -> WatchStream {
        loop {
            let delay = self.backoff.next_delay();
            tracing::debug!(service = %self.service, ?delay, attempt = self.backoff.failures(), "Reconnecting watch");
            tokio::time::sleep(delay).await;

            match connect(&self.registry, &self.prefix).await {
                Ok((stream, entries)) => {
                    self.entries = entries;
                    self.publish();
                    self.backoff.reset();
                    tracing::info!(service = %self.service, "Watch re-established");
                    return stream;
                }
                Err(e) => {
                    tracing::warn!(service = %self.service, error = %e, "Watch reconnect failed, keeping last known endpoints");
                }
            }
        }
    }

    /// Swap in a new set if the addresses changed.
    fn publish(&self) {
        let previous = self.current.load();
        let addresses = addresses(&self.entries);
        if addresses == previous.addresses {
            return;
        }

        let version = previous.version + 1;
        tracing::info!(
            service = %self.service,
            version,
            endpoints = ?addresses,
            "Resolved endpoints changed"
        );
        self.current.store(Arc::new(ResolvedEndpointSet {
            service: self.service.clone(),
            addresses,
            version,
        }));
        self.version_tx.send_replace(version);
    }
}

#[derive(Debug)]
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Live view of a subscribed service. Clones share one follower task,
/// which stops when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct ResolverWatch {
    current: Arc<ArcSwap<ResolvedEndpointSet>>,
    version_rx: watch::Receiver<u64>,
    _task: Arc<AbortOnDrop>,
}

impl ResolverWatch {
    pub fn current(&self) -> Arc<ResolvedEndpointSet> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Wait for the next version. Returns `false` if the follower stopped.
    pub async fn changed(&mut self) -> bool {
        self.version_rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::store::{CoordinationStore, KeyValue, LeaseId, StoreError};
    use crate::registry::MemoryStore;
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    async fn wait_until(watch: &mut ResolverWatch, pred: impl Fn(&ResolvedEndpointSet) -> bool) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while !pred(&watch.current()) {
                assert!(watch.changed().await, "follower stopped");
            }
        })
        .await
        .expect("resolver did not converge");
    }

    #[tokio::test(start_paused = true)]
    async fn follows_registrations_and_expiry() {
        let store = MemoryStore::new();
        let registry = Registry::new(Arc::new(store.clone()), "mesh");
        let mut watch = registry.resolver().subscribe("tag").await.unwrap();
        assert!(watch.current().addresses.is_empty());
        assert_eq!(watch.version(), 1);

        let a = registry.register("tag", "a:1", Duration::from_secs(2)).await.unwrap();
        let _b = registry.register("tag", "b:1", Duration::from_secs(2)).await.unwrap();
        wait_until(&mut watch, |set| set.addresses == ["a:1", "b:1"]).await;

        let started = tokio::time::Instant::now();
        drop(a);
        wait_until(&mut watch, |set| !set.contains("a:1")).await;
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(watch.current().addresses, ["b:1"]);
    }

    #[tokio::test]
    async fn one_shot_resolve_lists_current_addresses() {
        let store = MemoryStore::new();
        let registry = Registry::new(Arc::new(store.clone()), "mesh");
        store
            .put("/mesh/grpc/tag/x:1", r#"{"Addr":"x:1"}"#, None)
            .await
            .unwrap();
        store.put("/mesh/grpc/tag/raw:2", "not json", None).await.unwrap();
        store.put("/mesh/grpc/tags/other:3", r#"{"Addr":"other:3"}"#, None).await.unwrap();

        let set = registry.resolver().resolve("tag").await.unwrap();
        assert_eq!(set.addresses, ["raw:2", "x:1"]);
    }

    /// Store whose watch breaks on demand; listing can be made to fail.
    #[derive(Debug)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_listing: AtomicBool,
        watches: AtomicUsize,
    }

    #[async_trait]
    impl CoordinationStore for FlakyStore {
        async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
            self.inner.grant_lease(ttl).await
        }
        async fn keep_alive(&self, lease: LeaseId) -> Result<(), StoreError> {
            self.inner.keep_alive(lease).await
        }
        async fn revoke(&self, lease: LeaseId) -> Result<(), StoreError> {
            self.inner.revoke(lease).await
        }
        async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<(), StoreError> {
            self.inner.put(key, value, lease).await
        }
        async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("down".into()));
            }
            self.inner.get_prefix(prefix).await
        }
        async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream, StoreError> {
            // The first watch dies immediately; later ones are real.
            if self.watches.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(stream::iter(vec![Err(StoreError::Unavailable("reset".into()))]).boxed());
            }
            self.inner.watch_prefix(prefix).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn relists_after_disconnect_and_keeps_stale_set_meanwhile() {
        let inner = MemoryStore::new();
        inner.put("/mesh/grpc/tag/a:1", r#"{"Addr":"a:1"}"#, None).await.unwrap();
        let store = Arc::new(FlakyStore {
            inner: inner.clone(),
            fail_listing: AtomicBool::new(false),
            watches: AtomicUsize::new(0),
        });
        let registry = Registry::new(store.clone(), "mesh");
        let mut watch = registry.resolver().subscribe("tag").await.unwrap();
        assert_eq!(watch.current().addresses, ["a:1"]);

        // While the watch is broken and listing fails, changes are missed
        // but the last set is still served.
        store.fail_listing.store(true, Ordering::SeqCst);
        inner.put("/mesh/grpc/tag/b:1", r#"{"Addr":"b:1"}"#, None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(watch.current().addresses, ["a:1"]);

        // Once the store is back, the re-list picks up what was missed.
        store.fail_listing.store(false, Ordering::SeqCst);
        wait_until(&mut watch, |set| set.addresses == ["a:1", "b:1"]).await;
        assert!(store.watches.load(Ordering::SeqCst) >= 2);
    }
}
