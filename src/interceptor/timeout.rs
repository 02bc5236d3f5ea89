//! Deadline enforcement.
//!
//! The effective deadline is the earlier of the caller's deadline and
//! `now + timeout`. When it passes, the inner future is dropped, which
//! cancels every in-flight sub-operation it owns.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tonic::Status;

use crate::interceptor::{Interceptor, Next};
use crate::rpc::CallContext;

#[derive(Debug, Clone, Copy)]
pub struct TimeoutInterceptor {
    timeout: Duration,
}

impl TimeoutInterceptor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<Req, Res> Interceptor<Req, Res> for TimeoutInterceptor
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn name(&self) -> &'static str {
        "timeout"
    }

    async fn intercept(
        &self,
        mut ctx: CallContext,
        req: Req,
        next: Next<Req, Res>,
    ) -> Result<Res, Status> {
        let deadline = ctx.tighten_deadline(Instant::now() + self.timeout);
        let method = ctx.method().to_owned();

        match tokio::time::timeout_at(deadline, next.call(ctx, req)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(method = %method, timeout = ?self.timeout, "Call deadline exceeded");
                Err(Status::deadline_exceeded("deadline exceeded"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{Handler, InterceptorChain};
    use std::sync::{Arc, Mutex};
    use tonic::Code;

    fn recording_terminal(seen: Arc<Mutex<Option<Instant>>>) -> Handler<(), ()> {
        Handler::from_fn(move |ctx: CallContext, _req: ()| {
            *seen.lock().unwrap() = ctx.deadline();
            async move { Ok(()) }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn tighter_parent_deadline_wins() {
        let seen = Arc::new(Mutex::new(None));
        let handler = InterceptorChain::new()
            .push(TimeoutInterceptor::new(Duration::from_secs(2)))
            .build(recording_terminal(Arc::clone(&seen)));

        let start = Instant::now();
        let ctx = CallContext::new("/t").with_timeout(Duration::from_millis(500));
        handler.call(ctx, ()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(start + Duration::from_millis(500)));
    }

    #[tokio::test(start_paused = true)]
    async fn configured_timeout_applies_without_parent() {
        let seen = Arc::new(Mutex::new(None));
        let handler = InterceptorChain::new()
            .push(TimeoutInterceptor::new(Duration::from_secs(2)))
            .build(recording_terminal(Arc::clone(&seen)));

        let start = Instant::now();
        handler.call(CallContext::new("/t"), ()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(start + Duration::from_secs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_is_cut_off() {
        let handler = InterceptorChain::new()
            .push(TimeoutInterceptor::new(Duration::from_millis(100)))
            .build(Handler::from_fn(|_ctx, _req: ()| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, Status>(())
            }));

        let err = handler.call(CallContext::new("/t"), ()).await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        assert_eq!(err.message(), "deadline exceeded");
    }
}
