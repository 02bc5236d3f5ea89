//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, histograms)
//!     → tracer.rs (RPC spans with propagated trace context)
//!
//! Consumers:
//!     → stdout (fmt subscriber, filtered by RUST_LOG / config)
//!     → Metrics endpoint (Prometheus scrape)
//!     → Span sink chosen by the injected Tracer
//! ```
//!
//! # Design Decisions
//! - No global tracer: every component receives an `Arc<dyn Tracer>`
//! - Trace context crosses process boundaries as a W3C `traceparent` header
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
pub mod tracer;

pub use tracer::{LogTracer, NoopTracer, Span, SpanContext, SpanKind, Tracer};
