//! Client side of an RPC: composed chain over a load-balanced wire call.

use std::sync::Arc;
use std::time::Duration;

use crate::interceptor::{
    Handler, InterceptorChain, RetryInterceptor, RetryPolicy, TimeoutInterceptor,
    TracingInterceptor,
};
use crate::load_balancer::EndpointPool;
use crate::observability::Tracer;
use crate::registry::RegistryError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint address {address}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("service discovery failed: {0}")]
    Discovery(#[from] RegistryError),
}

/// Builds the client chain for each method.
#[derive(Debug, Clone)]
pub struct ClientInterceptors {
    tracer: Arc<dyn Tracer>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ClientInterceptors {
    pub fn new(tracer: Arc<dyn Tracer>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            tracer,
            timeout,
            retry,
        }
    }

    /// timeout → tracing → retry
    pub fn chain<Req, Res>(&self) -> InterceptorChain<Req, Res>
    where
        Req: Clone + Send + Sync + 'static,
        Res: Send + 'static,
    {
        InterceptorChain::new()
            .push(TimeoutInterceptor::new(self.timeout))
            .push(TracingInterceptor::client(Arc::clone(&self.tracer)))
            .push(RetryInterceptor::new(self.retry.clone()))
    }
}

/// Load-balanced client for one logical service.
#[derive(Debug, Clone)]
pub struct RpcClient {
    pool: Arc<EndpointPool>,
    interceptors: ClientInterceptors,
}

impl RpcClient {
    pub fn new(pool: Arc<EndpointPool>, interceptors: ClientInterceptors) -> Self {
        Self { pool, interceptors }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    /// Composed handler for the unary method at `path`.
    ///
    /// Every attempt (retries included) picks its endpoint afresh.
    pub fn unary<Req, Res>(&self, path: &'static str) -> Handler<Req, Res>
    where
        Req: prost::Message + Clone + Send + Sync + 'static,
        Res: prost::Message + Default + Send + Sync + 'static,
    {
        let pool = Arc::clone(&self.pool);
        let wire = Handler::from_fn(move |ctx, req: Req| {
            let pool = Arc::clone(&pool);
            async move {
                let endpoint = pool.pick()?;
                tracing::debug!(
                    method = path,
                    endpoint = %endpoint.address(),
                    attempt = ctx.attempt(),
                    "Sending call"
                );
                endpoint.unary(ctx, path, req).await
            }
        });
        self.interceptors.chain::<Req, Res>().build(wire)
    }
}
