//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → store + registry → method table + gateway → bind
//!     → register (fatal on failure) → serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → revoke registration → stop accepting
//!     → drain connections → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!     Second SIGTERM/SIGINT → exit immediately
//! ```
//!
//! # Design Decisions
//! - Ordered startup: traffic is accepted only once registration succeeded
//! - Deregistration starts with the drain so clients stop picking us early
//! - Shutdown has a timeout: connections still open after it are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_mux, coordination_store, serve, start, tracer, StartupError};
