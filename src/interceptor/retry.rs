//! Client-side retries.
//!
//! # Policy
//! - At most `max_attempts` calls in total, the first one included
//! - Only codes in the allow-list are retried, and never an error that
//!   carries a structured business detail
//! - Each attempt runs on its own clone of the context (attempt number,
//!   optional per-attempt timeout); the caller's deadline is never reset
//! - No attempt starts at or past the deadline; the last error is returned
//!   instead

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tonic::{Code, Status};

use crate::interceptor::{Interceptor, Next};
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;
use crate::rpc::status::error_detail;
use crate::rpc::CallContext;

/// Default allow-list: transient and unknown failures.
pub const DEFAULT_RETRY_CODES: [Code; 4] = [
    Code::Unknown,
    Code::Internal,
    Code::DeadlineExceeded,
    Code::Unavailable,
];

#[derive(Debug, Clone)]
#[must_use]
pub struct RetryPolicy {
    /// Total attempts, including the first call.
    pub max_attempts: u32,
    pub codes: Vec<Code>,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub per_attempt_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            codes: DEFAULT_RETRY_CODES.to_vec(),
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            per_attempt_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    pub fn with_codes(mut self, codes: impl IntoIterator<Item = Code>) -> Self {
        self.codes = codes.into_iter().collect();
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = Some(timeout);
        self
    }

    pub fn is_retryable(&self, status: &Status) -> bool {
        self.codes.contains(&status.code()) && error_detail(status).is_none()
    }

    fn backoff(&self, attempt: u32) -> Duration {
        calculate_backoff(
            attempt,
            self.base_backoff.as_millis() as u64,
            self.max_backoff.as_millis() as u64,
        )
    }
}

#[derive(Debug, Clone)]
pub struct RetryInterceptor {
    policy: RetryPolicy,
}

impl RetryInterceptor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt<Req, Res>(
        &self,
        mut ctx: CallContext,
        req: Req,
        next: &Next<Req, Res>,
    ) -> Result<Res, Status>
    where
        Req: Send + 'static,
        Res: Send + 'static,
    {
        let Some(timeout) = self.policy.per_attempt_timeout else {
            return next.call(ctx, req).await;
        };
        let deadline = ctx.tighten_deadline(Instant::now() + timeout);
        match tokio::time::timeout_at(deadline, next.call(ctx, req)).await {
            Ok(result) => result,
            Err(_) => Err(Status::deadline_exceeded("deadline exceeded")),
        }
    }
}

#[async_trait]
impl<Req, Res> Interceptor<Req, Res> for RetryInterceptor
where
    Req: Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    fn name(&self) -> &'static str {
        "retry"
    }

    async fn intercept(
        &self,
        ctx: CallContext,
        req: Req,
        next: Next<Req, Res>,
    ) -> Result<Res, Status> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let mut attempt_ctx = ctx.clone();
            attempt_ctx.set_attempt(attempt);

            let status = match self.attempt(attempt_ctx, req.clone(), &next).await {
                Ok(res) => {
                    if attempt > 1 {
                        tracing::info!(method = %ctx.method(), attempt, "Call succeeded after retries");
                    }
                    return Ok(res);
                }
                Err(status) => status,
            };

            if attempt >= self.policy.max_attempts || !self.policy.is_retryable(&status) {
                if attempt > 1 {
                    tracing::warn!(
                        method = %ctx.method(),
                        attempt,
                        code = ?status.code(),
                        "Call giving up"
                    );
                }
                return Err(status);
            }

            let backoff = self.policy.backoff(attempt);
            if let Some(deadline) = ctx.deadline() {
                if Instant::now() + backoff >= deadline {
                    tracing::debug!(
                        method = %ctx.method(),
                        attempt,
                        "Deadline reached, not retrying"
                    );
                    return Err(status);
                }
            }

            tracing::info!(
                method = %ctx.method(),
                attempt,
                code = ?status.code(),
                delay = ?backoff,
                "Retrying call"
            );
            metrics::record_retry(ctx.method(), status.code());
            tokio::time::sleep(backoff).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::{Handler, InterceptorChain, TimeoutInterceptor};
    use crate::rpc::status::GET_TAG_LIST_FAIL;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn failing(calls: Arc<AtomicU32>, status: Status) -> Handler<(), ()> {
        Handler::from_fn(move |_ctx, _req: ()| {
            calls.fetch_add(1, Ordering::SeqCst);
            let status = status.clone();
            async move { Err::<(), _>(status) }
        })
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts)
            .with_codes([Code::Unknown, Code::Internal, Code::DeadlineExceeded])
            .with_backoff(Duration::from_millis(1), Duration::from_millis(5))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_allow_listed_code_up_to_max() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = InterceptorChain::new()
            .push(RetryInterceptor::new(policy(2)))
            .build(failing(Arc::clone(&calls), Status::internal("boom")));

        let err = handler.call(CallContext::new("/t"), ()).await.unwrap_err();
        assert_eq!(err.code(), Code::Internal);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn other_codes_fail_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = InterceptorChain::new()
            .push(RetryInterceptor::new(policy(2)))
            .build(failing(Arc::clone(&calls), Status::invalid_argument("bad")));

        let err = handler.call(CallContext::new("/t"), ()).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn business_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let handler = InterceptorChain::new()
            .push(RetryInterceptor::new(policy(3)))
            .build(failing(Arc::clone(&calls), GET_TAG_LIST_FAIL.to_status()));

        handler.call(CallContext::new("/t"), ()).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_get_their_own_context() {
        let attempts = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = Arc::clone(&attempts);
        let handler = InterceptorChain::new()
            .push(RetryInterceptor::new(policy(3)))
            .build(Handler::from_fn(move |ctx: CallContext, _req: ()| {
                seen.lock().unwrap().push(ctx.attempt());
                let attempt = ctx.attempt();
                async move {
                    if attempt < 3 {
                        Err(Status::unknown("flaky"))
                    } else {
                        Ok(())
                    }
                }
            }));

        handler.call(CallContext::new("/t"), ()).await.unwrap();
        assert_eq!(*attempts.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_retry_starts_after_the_deadline() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let handler = InterceptorChain::new()
            .push(TimeoutInterceptor::new(Duration::from_millis(100)))
            .push(RetryInterceptor::new(
                policy(5).with_per_attempt_timeout(Duration::from_millis(60)),
            ))
            .build(Handler::from_fn(move |_ctx, _req: ()| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, Status>(())
                }
            }));

        let err = handler.call(CallContext::new("/t"), ()).await.unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded);
        // First attempt times out at 60ms, the second is cut at the 100ms
        // overall deadline; nothing starts after that.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn max_attempts_is_at_least_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts, 1);
    }
}
