//! Service registration and discovery.
//!
//! # Data Flow
//! ```text
//! Server start:
//!     register.rs → grant lease → put /{ns}/grpc/{service}/{addr} → refresh every ttl/3
//!
//! Client:
//!     resolver.rs → watch prefix → list prefix → publish ResolvedEndpointSet
//!                → on watch error: back off, re-watch, re-list
//!
//! Store (store.rs):
//!     memory.rs (in-process) | etcd.rs (etcd v3 JSON gateway)
//! ```
//!
//! # Design Decisions
//! - Registration lives exactly as long as its lease; a crashed server
//!   disappears from every resolver once the TTL elapses
//! - Resolved sets are replaced whole and versioned, never edited in place
//! - The value written under each key is the etcd naming record
//!   `{"Addr":"host:port"}`, so other etcd-aware resolvers can read it

use serde::{Deserialize, Serialize};

pub mod etcd;
pub mod memory;
pub mod register;
pub mod resolver;
pub mod store;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;
pub use register::{RegistrationHandle, Registry};
pub use resolver::{ResolvedEndpointSet, Resolver, ResolverWatch};
pub use store::{CoordinationStore, KeyValue, LeaseId, StoreError, WatchEvent, WatchStream};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid registration: {0}")]
    Invalid(String),
    #[error("failed to encode naming record: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Value stored under each endpoint key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamingRecord {
    #[serde(rename = "Addr")]
    pub addr: String,
}

/// Logical key of a service: `/{namespace}/grpc/{service}`.
pub fn service_key(namespace: &str, service: &str) -> String {
    format!("/{}/grpc/{}", namespace.trim_matches('/'), service)
}

/// Prefix under which every endpoint of `service` lives.
pub fn service_prefix(namespace: &str, service: &str) -> String {
    format!("{}/", service_key(namespace, service))
}

pub fn endpoint_key(namespace: &str, service: &str, address: &str) -> String {
    format!("{}{}", service_prefix(namespace, service), address)
}
