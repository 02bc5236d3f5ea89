//! RPC span tracing.
//!
//! # Responsibilities
//! - Open and close spans around RPC calls
//! - Carry trace/span identifiers across process boundaries
//! - Tag spans that end in an error
//!
//! # Design Decisions
//! - Tracers are injected into the components that need them
//! - W3C Trace Context (`traceparent`) is the only propagation format
//! - `NoopTracer` still mints identifiers so propagation keeps working

use std::fmt;
use std::time::Instant;

use tonic::Code;

/// Metadata key carrying the W3C trace context.
pub const TRACEPARENT: &str = "traceparent";

/// Identifiers of one span within a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpanContext {
    pub trace_id: u128,
    pub span_id: u64,
    pub sampled: bool,
}

impl SpanContext {
    /// Mint a child of `parent`, or the root of a new trace.
    pub fn child_of(parent: Option<&SpanContext>) -> Self {
        let trace_id = match parent {
            Some(p) => p.trace_id,
            None => non_zero_u128(),
        };
        Self {
            trace_id,
            span_id: non_zero_u64(),
            sampled: parent.map(|p| p.sampled).unwrap_or(true),
        }
    }

    /// Render as a `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!(
            "00-{:032x}-{:016x}-{:02x}",
            self.trace_id,
            self.span_id,
            u8::from(self.sampled)
        )
    }

    /// Parse a `traceparent` header value. Returns `None` for anything malformed.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let version = parts.next()?;
        let trace = parts.next()?;
        let span = parts.next()?;
        let flags = parts.next()?;

        if version.len() != 2 || version == "ff" || trace.len() != 32 || span.len() != 16 || flags.len() != 2 {
            return None;
        }

        let trace_id = u128::from_str_radix(trace, 16).ok()?;
        let span_id = u64::from_str_radix(span, 16).ok()?;
        let flags = u8::from_str_radix(flags, 16).ok()?;
        if trace_id == 0 || span_id == 0 {
            return None;
        }

        Some(Self {
            trace_id,
            span_id,
            sampled: flags & 0x01 == 0x01,
        })
    }
}

impl fmt::Display for SpanContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}/{:016x}", self.trace_id, self.span_id)
    }
}

fn non_zero_u128() -> u128 {
    loop {
        let id: u128 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

fn non_zero_u64() -> u64 {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return id;
        }
    }
}

/// Which side of the call a span describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Client,
    Server,
}

impl SpanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanKind::Client => "client",
            SpanKind::Server => "server",
        }
    }
}

/// An open span. Finishing consumes it.
pub trait Span: Send {
    fn context(&self) -> SpanContext;

    /// Mark the span as failed.
    fn set_error(&mut self, code: Code, message: &str);

    /// The `tracing` span inner work should be instrumented with, if any.
    fn tracing_span(&self) -> tracing::Span {
        tracing::Span::none()
    }

    fn finish(self: Box<Self>);
}

/// Factory for spans.
pub trait Tracer: Send + Sync + fmt::Debug {
    fn start_span(&self, name: &str, kind: SpanKind, parent: Option<SpanContext>) -> Box<dyn Span>;
}

/// Records nothing, but still mints identifiers for propagation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

struct NoopSpan(SpanContext);

impl Span for NoopSpan {
    fn context(&self) -> SpanContext {
        self.0
    }

    fn set_error(&mut self, _code: Code, _message: &str) {}

    fn finish(self: Box<Self>) {}
}

impl Tracer for NoopTracer {
    fn start_span(&self, _name: &str, _kind: SpanKind, parent: Option<SpanContext>) -> Box<dyn Span> {
        Box::new(NoopSpan(SpanContext::child_of(parent.as_ref())))
    }
}

/// Emits spans through the `tracing` subscriber.
#[derive(Debug, Clone)]
pub struct LogTracer {
    service_name: String,
}

impl LogTracer {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl Tracer for LogTracer {
    fn start_span(&self, name: &str, kind: SpanKind, parent: Option<SpanContext>) -> Box<dyn Span> {
        let context = SpanContext::child_of(parent.as_ref());
        let parent_id = parent.map(|p| format!("{:016x}", p.span_id));
        let span = tracing::info_span!(
            "rpc",
            service = %self.service_name,
            method = %name,
            kind = kind.as_str(),
            trace_id = %format!("{:032x}", context.trace_id),
            span_id = %format!("{:016x}", context.span_id),
            parent_id = parent_id.as_deref().unwrap_or(""),
        );
        Box::new(LogSpan {
            context,
            span,
            started: Instant::now(),
            error: None,
            finished: false,
        })
    }
}

struct LogSpan {
    context: SpanContext,
    span: tracing::Span,
    started: Instant,
    error: Option<(Code, String)>,
    finished: bool,
}

impl LogSpan {
    fn close(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        let _entered = self.span.enter();
        match &self.error {
            Some((code, message)) => tracing::debug!(
                elapsed_ms,
                error = true,
                code = ?code,
                message = %message,
                "span finished"
            ),
            None => tracing::debug!(elapsed_ms, "span finished"),
        }
    }
}

impl Span for LogSpan {
    fn context(&self) -> SpanContext {
        self.context
    }

    fn set_error(&mut self, code: Code, message: &str) {
        self.error = Some((code, message.to_owned()));
    }

    fn tracing_span(&self) -> tracing::Span {
        self.span.clone()
    }

    fn finish(mut self: Box<Self>) {
        self.close();
    }
}

impl Drop for LogSpan {
    // Spans dropped by cancellation or unwinding are still closed.
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traceparent_round_trips() {
        let ctx = SpanContext {
            trace_id: 0x4bf92f3577b34da6a3ce929d0e0e4736,
            span_id: 0x00f067aa0ba902b7,
            sampled: true,
        };
        let header = ctx.to_traceparent();
        assert_eq!(header, "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01");
        assert_eq!(SpanContext::from_traceparent(&header), Some(ctx));
    }

    #[test]
    fn malformed_traceparent_is_rejected() {
        assert!(SpanContext::from_traceparent("").is_none());
        assert!(SpanContext::from_traceparent("00-abc-def-01").is_none());
        assert!(SpanContext::from_traceparent(
            "00-00000000000000000000000000000000-00f067aa0ba902b7-01"
        )
        .is_none());
    }

    #[test]
    fn child_keeps_trace_id() {
        let root = SpanContext::child_of(None);
        let child = SpanContext::child_of(Some(&root));
        assert_eq!(root.trace_id, child.trace_id);
        assert_ne!(root.span_id, child.span_id);
    }

    #[test]
    fn noop_tracer_propagates_parent() {
        let parent = SpanContext::child_of(None);
        let span = NoopTracer.start_span("/x", SpanKind::Server, Some(parent));
        assert_eq!(span.context().trace_id, parent.trace_id);
        span.finish();
    }
}
