//! Per-call context.

use std::time::Duration;

use tokio::time::Instant;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};

use crate::observability::tracer::{SpanContext, TRACEPARENT};

/// Metadata key for the propagated call deadline.
pub const GRPC_TIMEOUT: &str = "grpc-timeout";

/// State carried by a single call through its interceptor chain.
///
/// A context belongs to exactly one call. Retries clone it so each attempt
/// has its own copy; the deadline of the original is never pushed back.
#[derive(Debug, Clone)]
pub struct CallContext {
    method: String,
    deadline: Option<Instant>,
    span: Option<SpanContext>,
    attempt: u32,
    metadata: MetadataMap,
}

impl CallContext {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            deadline: None,
            span: None,
            attempt: 1,
            metadata: MetadataMap::new(),
        }
    }

    /// Build the context of an inbound call from its request metadata.
    ///
    /// `grpc-timeout` becomes the deadline and `traceparent` the parent span.
    pub fn from_metadata(method: impl Into<String>, metadata: MetadataMap) -> Self {
        let mut ctx = Self::new(method);
        if let Some(timeout) = metadata
            .get(GRPC_TIMEOUT)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout)
        {
            ctx.tighten_deadline(Instant::now() + timeout);
        }
        ctx.span = metadata
            .get(TRACEPARENT)
            .and_then(|v| v.to_str().ok())
            .and_then(SpanContext::from_traceparent);
        ctx.metadata = metadata;
        ctx
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tighten_deadline(Instant::now() + timeout);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.tighten_deadline(deadline);
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Move the deadline to `deadline` if that is earlier. Returns the effective deadline.
    pub fn tighten_deadline(&mut self, deadline: Instant) -> Instant {
        let effective = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        self.deadline = Some(effective);
        effective
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn span(&self) -> Option<SpanContext> {
        self.span
    }

    pub fn set_span(&mut self, span: SpanContext) {
        self.span = Some(span);
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    pub fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    /// Set an ASCII metadata entry, ignoring values that are not valid header text.
    pub fn insert_metadata(&mut self, key: &'static str, value: &str) {
        match value.parse::<AsciiMetadataValue>() {
            Ok(v) => {
                self.metadata.insert(key, v);
            }
            Err(_) => tracing::debug!(key, "Dropping metadata value that is not valid ASCII"),
        }
    }
}

/// Parse a `grpc-timeout` value: up to 8 digits followed by a unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

/// Render a duration as a `grpc-timeout` value, picking the finest unit that fits.
pub fn format_grpc_timeout(timeout: Duration) -> String {
    const MAX: u128 = 99_999_999;
    let nanos = timeout.as_nanos();
    if nanos <= MAX {
        return format!("{nanos}n");
    }
    let micros = timeout.as_micros();
    if micros <= MAX {
        return format!("{micros}u");
    }
    let millis = timeout.as_millis();
    if millis <= MAX {
        return format!("{millis}m");
    }
    let secs = timeout.as_secs() as u128;
    if secs <= MAX {
        return format!("{secs}S");
    }
    format!("{}M", (secs / 60).min(MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_grpc_timeout_units() {
        assert_eq!(parse_grpc_timeout("500m"), Some(Duration::from_millis(500)));
        assert_eq!(parse_grpc_timeout("2S"), Some(Duration::from_secs(2)));
        assert_eq!(parse_grpc_timeout("1H"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_grpc_timeout("10u"), Some(Duration::from_micros(10)));
        assert_eq!(parse_grpc_timeout("m"), None);
        assert_eq!(parse_grpc_timeout("123456789m"), None);
        assert_eq!(parse_grpc_timeout("5x"), None);
        assert_eq!(parse_grpc_timeout("-5m"), None);
    }

    #[test]
    fn formats_grpc_timeout() {
        assert_eq!(format_grpc_timeout(Duration::from_millis(50)), "50000000n");
        assert_eq!(format_grpc_timeout(Duration::from_secs(2)), "2000000u");
        assert_eq!(
            parse_grpc_timeout(&format_grpc_timeout(Duration::from_secs(600))),
            Some(Duration::from_secs(600))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_never_extends() {
        let start = Instant::now();
        let mut ctx = CallContext::new("/m").with_timeout(Duration::from_millis(500));
        let effective = ctx.tighten_deadline(start + Duration::from_secs(2));
        assert_eq!(effective, start + Duration::from_millis(500));

        let effective = ctx.tighten_deadline(start + Duration::from_millis(100));
        assert_eq!(effective, start + Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_metadata_sets_deadline_and_parent() {
        let parent = SpanContext::child_of(None);
        let mut md = MetadataMap::new();
        md.insert(GRPC_TIMEOUT, "250m".parse().unwrap());
        md.insert(TRACEPARENT, parent.to_traceparent().parse().unwrap());

        let start = Instant::now();
        let ctx = CallContext::from_metadata("/tag.TagService/GetTagList", md);
        assert_eq!(ctx.deadline(), Some(start + Duration::from_millis(250)));
        assert_eq!(ctx.span(), Some(parent));
        assert_eq!(ctx.attempt(), 1);
    }
}
