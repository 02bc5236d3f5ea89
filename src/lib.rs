//! tag-mesh: a small RPC service mesh around a tag-listing service.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────── tag-server ─────────────────────────┐
//!                  │                                                             │
//!  gRPC (h2c)  ────┼─▶ net ─▶ http::mux ──┬─▶ rpc::RpcServer ──┐                 │
//!  HTTP/JSON   ────┼─▶                    └─▶ axum router      │                 │
//!                  │                            └─▶ gateway ───┤                 │
//!                  │                                           ▼                 │
//!                  │                     interceptor chain (log, trace,          │
//!                  │                     timeout, recovery) ─▶ tag::TagServer ───┼─▶ blog API
//!                  │                                                             │
//!                  │  lifecycle: register lease ─▶ registry (memory | etcd)      │
//!                  └─────────────────────────────────────────────────────────────┘
//!
//!  tag-client ─▶ interceptor chain (timeout, trace, retry)
//!             ─▶ load_balancer (round robin over registry::Resolver set)
//!             ─▶ tag-server
//! ```

// Core subsystems
pub mod config;
pub mod gateway;
pub mod http;
pub mod net;
pub mod rpc;
pub mod tag;

// Discovery and traffic management
pub mod health;
pub mod load_balancer;
pub mod registry;

// Cross-cutting concerns
pub mod interceptor;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::MeshConfig;
pub use http::MeshServer;
pub use lifecycle::Shutdown;
