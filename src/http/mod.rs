//! HTTP/2 front door shared by gRPC and the JSON gateway.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::Listener)
//!     → server.rs (hyper auto builder: HTTP/1.1 or h2c per connection)
//!     → mux.rs (per request: gRPC or HTTP?)
//!         ├─ application/grpc over HTTP/2 → rpc::RpcServer
//!         └─ everything else → routes.rs (axum Router: /ping, gateway, 404)
//! ```
//!
//! # Design Decisions
//! - One port, one listener; the decision is made per request, not per
//!   connection, so one h2c connection may carry both kinds
//! - Request IDs only matter to the HTTP side; gRPC calls correlate
//!   through `traceparent`

pub mod mux;
pub mod request;
pub mod routes;
pub mod server;

pub use mux::{ProtocolMux, RouteDecision};
pub use request::{request_id, X_REQUEST_ID};
pub use routes::build_router;
pub use server::{MeshServer, ServerError};
