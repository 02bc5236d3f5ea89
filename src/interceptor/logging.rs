//! Access and error logging.
//!
//! Neither interceptor touches the response. Both hold a guard across the
//! inner call so a call that never returns normally (panic unwinding through
//! the chain, or cancellation by an outer deadline) is still logged.

use std::time::Instant;

use async_trait::async_trait;
use tonic::{Code, Status};

use crate::interceptor::{Interceptor, Next};
use crate::observability::metrics;
use crate::rpc::CallContext;

/// Logs every call on entry and exit, with elapsed time and outcome code.
#[derive(Debug, Default, Clone, Copy)]
pub struct AccessLogInterceptor;

/// Logs failed calls only.
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorLogInterceptor;

/// Logs a call that was abandoned before producing a result.
struct Unfinished<'a> {
    method: &'a str,
    started: Instant,
    armed: bool,
}

impl<'a> Unfinished<'a> {
    fn new(method: &'a str) -> Self {
        Self {
            method,
            started: Instant::now(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for Unfinished<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if std::thread::panicking() {
            tracing::error!(method = %self.method, elapsed_ms, "Call panicked before completing");
            metrics::record_call(self.method, Code::Internal, self.started.elapsed());
        } else {
            tracing::warn!(method = %self.method, elapsed_ms, "Call cancelled before completing");
            metrics::record_call(self.method, Code::Cancelled, self.started.elapsed());
        }
    }
}

#[async_trait]
impl<Req, Res> Interceptor<Req, Res> for AccessLogInterceptor
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn name(&self) -> &'static str {
        "access_log"
    }

    async fn intercept(
        &self,
        ctx: CallContext,
        req: Req,
        next: Next<Req, Res>,
    ) -> Result<Res, Status> {
        let method = ctx.method().to_owned();
        let attempt = ctx.attempt();
        tracing::info!(method = %method, attempt, "access request");

        let mut guard = Unfinished::new(&method);
        let result = next.call(ctx, req).await;
        guard.disarm();

        let elapsed = guard.started.elapsed();
        let code = match &result {
            Ok(_) => Code::Ok,
            Err(status) => status.code(),
        };
        tracing::info!(
            method = %method,
            code = ?code,
            elapsed_ms = elapsed.as_millis() as u64,
            "access response"
        );
        metrics::record_call(&method, code, elapsed);
        result
    }
}

#[async_trait]
impl<Req, Res> Interceptor<Req, Res> for ErrorLogInterceptor
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn name(&self) -> &'static str {
        "error_log"
    }

    async fn intercept(
        &self,
        ctx: CallContext,
        req: Req,
        next: Next<Req, Res>,
    ) -> Result<Res, Status> {
        let method = ctx.method().to_owned();
        let mut guard = Unfinished::new(&method);
        let result = next.call(ctx, req).await;
        guard.disarm();

        if let Err(status) = &result {
            tracing::error!(
                method = %method,
                code = ?status.code(),
                message = %status.message(),
                elapsed_ms = guard.started.elapsed().as_millis() as u64,
                "error response"
            );
        }
        result
    }
}
