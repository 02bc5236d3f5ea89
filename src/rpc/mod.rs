//! RPC plumbing shared by server and client.
//!
//! # Data Flow
//! ```text
//! Server: HTTP/2 gRPC request
//!     → method.rs (look up the path in the method table)
//!     → decode → CallContext from metadata → server chain → handler → encode
//!
//! Client: typed call
//!     → client.rs (client chain) → endpoint pick → encode → wire → decode
//! ```
//!
//! # Design Decisions
//! - Methods are registered by full path in a typed table; the gateway
//!   looks them up by type and calls the same composed pipeline in-process
//! - Errors at this boundary are always `tonic::Status`

pub mod client;
pub mod context;
pub mod method;
pub mod status;

pub use client::{ClientError, ClientInterceptors, RpcClient};
pub use context::CallContext;
pub use method::{MethodTable, RpcMethod, RpcServer, ServerInterceptors, UnaryMethod};
pub use status::{error_detail, ErrorCode, ErrorDetail};
