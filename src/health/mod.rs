//! Endpoint health.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → GET /ping on each endpoint of a pool
//!     → Update state.rs
//!
//! Passive health checks (passive.rs):
//!     Call fails with a transport error
//!     → Increment failure count
//!     → Update state.rs if threshold exceeded
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - Health only affects picking; an unhealthy endpoint stays in the
//!   resolved set until the registry drops it
//! - Health state is per-endpoint, not per-pool

pub mod active;
pub mod passive;
pub mod state;

pub use active::{HealthCheckSettings, HealthMonitor};
pub use state::{HealthState, HealthTracker, Thresholds};
