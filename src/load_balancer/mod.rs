//! Client-side load balancing.
//!
//! # Data Flow
//! ```text
//! Outbound call attempt
//!     → pool.rs (refresh from the resolver if its version moved)
//!     → round_robin.rs (rotate, skipping unavailable endpoints)
//!     → endpoint.rs (wire call over the endpoint's channel)
//!     → outcome fed back into the endpoint's health tracker
//! ```
//!
//! # Design Decisions
//! - The resolved set stays authoritative; health only affects selection
//! - Endpoints are reused across refreshes so their channels and health
//!   survive unrelated membership changes
//! - Every endpoint unavailable means the call fails `UNAVAILABLE`

use std::fmt::Debug;
use std::sync::Arc;

pub mod endpoint;
pub mod pool;
pub mod round_robin;

pub use endpoint::{Endpoint, EndpointSettings};
pub use pool::{EndpointPool, EndpointSource};
pub use round_robin::RoundRobin;

/// Selection strategy over a snapshot of endpoints.
pub trait LoadBalancer: Send + Sync + Debug {
    /// Pick an available endpoint, or `None` if there is none.
    fn pick(&self, endpoints: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>>;
}
