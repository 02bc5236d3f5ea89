//! Interceptor pipeline.
//!
//! # Data Flow
//! ```text
//! Server chain (per method):
//!     access log → error log → tracing(server) → timeout → recovery → handler
//!
//! Client chain (per method):
//!     timeout → tracing(client) → retry → wire call (picks an endpoint)
//! ```
//!
//! # Design Decisions
//! - A chain is an ordered list, folded into one `Handler` at build time
//! - Each interceptor gets the context, the request and a `Next` handle;
//!   it may call `next` zero or more times (retry calls it repeatedly)
//! - Code after `next` returns runs innermost-first (stack discipline)
//! - Chains are generic over request/response; a streaming call composes by
//!   using a stream as its response type

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tonic::Status;

use crate::rpc::CallContext;

pub mod logging;
pub mod recovery;
pub mod retry;
pub mod timeout;
pub mod trace;

pub use logging::{AccessLogInterceptor, ErrorLogInterceptor};
pub use recovery::RecoveryInterceptor;
pub use retry::{RetryInterceptor, RetryPolicy};
pub use timeout::TimeoutInterceptor;
pub use trace::TracingInterceptor;

type HandlerFn<Req, Res> =
    dyn Fn(CallContext, Req) -> BoxFuture<'static, Result<Res, Status>> + Send + Sync;

/// A composed, callable handler: either a terminal or a chain folded over one.
pub struct Handler<Req, Res> {
    inner: Arc<HandlerFn<Req, Res>>,
}

/// The remainder of the chain, as seen by an interceptor.
pub type Next<Req, Res> = Handler<Req, Res>;

impl<Req, Res> Clone for Handler<Req, Res> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<Req, Res> Handler<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Res, Status>> + Send + 'static,
    {
        Self {
            inner: Arc::new(move |ctx, req| Box::pin(f(ctx, req))),
        }
    }

    pub fn call(&self, ctx: CallContext, req: Req) -> BoxFuture<'static, Result<Res, Status>> {
        (self.inner)(ctx, req)
    }
}

impl<Req, Res> std::fmt::Debug for Handler<Req, Res> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

/// Middleware wrapped around a call.
#[async_trait]
pub trait Interceptor<Req, Res>: Send + Sync + 'static
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn name(&self) -> &'static str;

    async fn intercept(
        &self,
        ctx: CallContext,
        req: Req,
        next: Next<Req, Res>,
    ) -> Result<Res, Status>;
}

/// Ordered list of interceptors for one request/response pair.
pub struct InterceptorChain<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    interceptors: Vec<Arc<dyn Interceptor<Req, Res>>>,
}

impl<Req, Res> Default for InterceptorChain<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn default() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }
}

impl<Req, Res> InterceptorChain<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interceptor; it runs after every interceptor already present.
    pub fn push<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor<Req, Res>,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn push_arc(mut self, interceptor: Arc<dyn Interceptor<Req, Res>>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Fold the chain around `terminal`, first interceptor outermost.
    pub fn build(self, terminal: Handler<Req, Res>) -> Handler<Req, Res> {
        self.interceptors
            .into_iter()
            .rev()
            .fold(terminal, |next, interceptor| {
                Handler::from_fn(move |ctx, req| {
                    let interceptor = Arc::clone(&interceptor);
                    let next = next.clone();
                    async move { interceptor.intercept(ctx, req, next).await }
                })
            })
    }
}
