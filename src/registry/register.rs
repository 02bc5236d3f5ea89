//! Server-side registration.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::registry::resolver::Resolver;
use crate::registry::store::{CoordinationStore, LeaseId, StoreError};
use crate::registry::{endpoint_key, service_prefix, NamingRecord, RegistryError};

/// Entry point to one namespace of a coordination store.
#[derive(Debug, Clone)]
pub struct Registry {
    store: Arc<dyn CoordinationStore>,
    namespace: String,
}

impl Registry {
    pub fn new(store: Arc<dyn CoordinationStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn service_prefix(&self, service: &str) -> String {
        service_prefix(&self.namespace, service)
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(self.clone())
    }

    /// Publish `address` under `service` for as long as the returned handle lives.
    pub async fn register(
        &self,
        service: &str,
        address: &str,
        ttl: Duration,
    ) -> Result<RegistrationHandle, RegistryError> {
        if service.is_empty() || address.is_empty() {
            return Err(RegistryError::Invalid(
                "service name and address are required".into(),
            ));
        }
        if ttl.is_zero() {
            return Err(RegistryError::Invalid("lease ttl must be positive".into()));
        }

        let key = endpoint_key(&self.namespace, service, address);
        let value = serde_json::to_string(&NamingRecord {
            addr: address.to_owned(),
        })?;

        let lease = publish(self.store.as_ref(), &key, &value, ttl).await?;
        tracing::info!(service, address, key = %key, lease = %lease, ?ttl, "Service registered");

        let current = Arc::new(AtomicI64::new(lease.0));
        let refresher = tokio::spawn(refresh(
            Arc::clone(&self.store),
            key.clone(),
            value,
            ttl,
            Arc::clone(&current),
        ));

        Ok(RegistrationHandle {
            store: Arc::clone(&self.store),
            key,
            lease: current,
            refresher,
        })
    }
}

async fn publish(
    store: &dyn CoordinationStore,
    key: &str,
    value: &str,
    ttl: Duration,
) -> Result<LeaseId, StoreError> {
    let lease = store.grant_lease(ttl).await?;
    store.put(key, value, Some(lease)).await?;
    Ok(lease)
}

/// Keep the lease alive every ttl/3; re-grant and re-put if it was lost.
async fn refresh(
    store: Arc<dyn CoordinationStore>,
    key: String,
    value: String,
    ttl: Duration,
    lease: Arc<AtomicI64>,
) {
    let period = (ttl / 3).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let id = LeaseId(lease.load(Ordering::Acquire));
        match store.keep_alive(id).await {
            Ok(()) => tracing::trace!(key = %key, lease = %id, "Lease refreshed"),
            Err(StoreError::LeaseNotFound(_)) => {
                tracing::warn!(key = %key, lease = %id, "Lease lost, registering again");
                match publish(store.as_ref(), &key, &value, ttl).await {
                    Ok(new) => {
                        lease.store(new.0, Ordering::Release);
                        tracing::info!(key = %key, lease = %new, "Service re-registered");
                    }
                    Err(e) => tracing::error!(key = %key, error = %e, "Re-registration failed"),
                }
            }
            Err(e) => tracing::warn!(key = %key, lease = %id, error = %e, "Lease refresh failed"),
        }
    }
}

/// A live registration. `close` removes it at once; dropping stops the
/// refresher and lets the lease run out.
#[derive(Debug)]
pub struct RegistrationHandle {
    store: Arc<dyn CoordinationStore>,
    key: String,
    lease: Arc<AtomicI64>,
    refresher: JoinHandle<()>,
}

impl RegistrationHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn lease(&self) -> LeaseId {
        LeaseId(self.lease.load(Ordering::Acquire))
    }

    /// Revoke the lease, deleting the key immediately.
    pub async fn close(self) -> Result<(), RegistryError> {
        self.refresher.abort();
        let lease = self.lease();
        match self.store.revoke(lease).await {
            Ok(()) | Err(StoreError::LeaseNotFound(_)) => {
                tracing::info!(key = %self.key, lease = %lease, "Service deregistered");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        self.refresher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryStore;

    fn registry(store: &MemoryStore) -> Registry {
        Registry::new(Arc::new(store.clone()), "test")
    }

    #[tokio::test(start_paused = true)]
    async fn refresher_keeps_registration_alive() {
        let store = MemoryStore::new();
        let handle = registry(&store)
            .register("svc", "127.0.0.1:1", Duration::from_secs(3))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let kvs = store.get_prefix("/test/grpc/svc/").await.unwrap();
        assert_eq!(kvs.len(), 1);
        assert_eq!(kvs[0].key, handle.key());
        assert_eq!(kvs[0].value, r#"{"Addr":"127.0.0.1:1"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_lease_is_regranted() {
        let store = MemoryStore::new();
        let handle = registry(&store)
            .register("svc", "127.0.0.1:1", Duration::from_secs(3))
            .await
            .unwrap();
        let first = handle.lease();

        store.revoke(first).await.unwrap();
        assert!(store.get_prefix("/test/grpc/svc/").await.unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_ne!(handle.lease(), first);
        assert_eq!(store.get_prefix("/test/grpc/svc/").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_removes_immediately_and_drop_lets_lease_lapse() {
        let store = MemoryStore::new();
        let reg = registry(&store);

        let closed = reg.register("svc", "a:1", Duration::from_secs(5)).await.unwrap();
        let dropped = reg.register("svc", "b:1", Duration::from_secs(5)).await.unwrap();

        closed.close().await.unwrap();
        assert_eq!(store.get_prefix("/test/grpc/svc/").await.unwrap().len(), 1);

        drop(dropped);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(store.get_prefix("/test/grpc/svc/").await.unwrap().len(), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(store.get_prefix("/test/grpc/svc/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_fields() {
        let store = MemoryStore::new();
        let err = registry(&store)
            .register("", "a:1", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Invalid(_)));
    }
}
