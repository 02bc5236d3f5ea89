//! The tag service: messages, server implementation and typed client.
//!
//! # Data Flow
//! ```text
//! GetTagList (gRPC or gateway)
//!     → service.rs (TagService trait, registered in the method table)
//!     → upstream.rs (TagServer: GET {blog}/api/v1/tags?name=..)
//!     → JSON → GetTagListReply
//! ```

pub mod client;
pub mod proto;
pub mod service;
pub mod upstream;

pub use client::TagServiceClient;
pub use proto::{GetTagListReply, GetTagListRequest, Pager, Tag, GET_TAG_LIST, SERVICE_NAME};
pub use service::TagService;
pub use upstream::{BlogApi, TagServer};
