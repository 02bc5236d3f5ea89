//! Span tracing around calls.
//!
//! Server side: the parent span comes from the inbound `traceparent`.
//! Client side: the new span becomes the outbound `traceparent` so the
//! server's span is its child.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::Status;
use tracing::Instrument;

use crate::interceptor::{Interceptor, Next};
use crate::observability::tracer::{SpanKind, Tracer, TRACEPARENT};
use crate::rpc::CallContext;

#[derive(Debug, Clone)]
pub struct TracingInterceptor {
    tracer: Arc<dyn Tracer>,
    kind: SpanKind,
}

impl TracingInterceptor {
    pub fn server(tracer: Arc<dyn Tracer>) -> Self {
        Self {
            tracer,
            kind: SpanKind::Server,
        }
    }

    pub fn client(tracer: Arc<dyn Tracer>) -> Self {
        Self {
            tracer,
            kind: SpanKind::Client,
        }
    }
}

#[async_trait]
impl<Req, Res> Interceptor<Req, Res> for TracingInterceptor
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn name(&self) -> &'static str {
        match self.kind {
            SpanKind::Server => "server_tracing",
            SpanKind::Client => "client_tracing",
        }
    }

    async fn intercept(
        &self,
        mut ctx: CallContext,
        req: Req,
        next: Next<Req, Res>,
    ) -> Result<Res, Status> {
        let mut span = self.tracer.start_span(ctx.method(), self.kind, ctx.span());
        let span_ctx = span.context();
        ctx.set_span(span_ctx);
        if self.kind == SpanKind::Client {
            ctx.insert_metadata(TRACEPARENT, &span_ctx.to_traceparent());
        }

        let result = next.call(ctx, req).instrument(span.tracing_span()).await;
        if let Err(status) = &result {
            span.set_error(status.code(), status.message());
        }
        span.finish();
        result
    }
}
