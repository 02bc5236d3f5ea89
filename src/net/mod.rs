//! Network layer.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limit)
//!     → connection.rs (tracking, drain signal)
//!     → Hand off to the protocol multiplexer
//!
//! Connection States:
//!     Active → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - A permit is taken before accept, so a full server stops accepting
//!   instead of accepting and dropping
//! - Every connection is tracked so shutdown can wait for them to drain

pub mod connection;
pub mod listener;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker, DrainSignal};
pub use listener::{ConnectionPermit, Listener, ListenerError};
