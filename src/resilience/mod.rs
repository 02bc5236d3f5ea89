//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Failed attempt (RPC retry, store watch disconnect, lease refresh)
//!     → backoff.rs (exponential delay with jitter, capped)
//!     → caller sleeps, then tries again
//! ```
//!
//! # Design Decisions
//! - Delays are pure functions of the attempt number; callers own the loop
//! - Jitter spreads reconnect storms across clients

pub mod backoff;

pub use backoff::{calculate_backoff, Backoff};
