//! Typed client for the tag service.

use std::sync::Arc;

use tonic::Status;

use crate::config::ClientConfig;
use crate::interceptor::Handler;
use crate::load_balancer::EndpointPool;
use crate::observability::Tracer;
use crate::registry::Registry;
use crate::rpc::{CallContext, ClientError, ClientInterceptors, RpcClient};
use crate::tag::proto::{GetTagListReply, GetTagListRequest, GET_TAG_LIST, SERVICE_NAME};

#[derive(Debug, Clone)]
pub struct TagServiceClient {
    pool: Arc<EndpointPool>,
    get_tag_list: Handler<GetTagListRequest, GetTagListReply>,
}

impl TagServiceClient {
    pub fn new(client: &RpcClient) -> Self {
        Self {
            pool: Arc::clone(client.pool()),
            get_tag_list: client.unary(GET_TAG_LIST),
        }
    }

    /// Client over `config.targets`, or over the addresses `registry`
    /// publishes for the tag service when no target is configured.
    pub async fn connect(
        config: &ClientConfig,
        registry: &Registry,
        tracer: Arc<dyn Tracer>,
    ) -> Result<Self, ClientError> {
        let settings = config.endpoint_settings();
        let pool = if config.targets.is_empty() {
            let watch = registry.resolver().subscribe(SERVICE_NAME).await?;
            tracing::info!(
                service = SERVICE_NAME,
                endpoints = watch.current().addresses.len(),
                "Resolved service through registry"
            );
            EndpointPool::discovered(SERVICE_NAME, watch, settings)
        } else {
            EndpointPool::from_static(SERVICE_NAME, config.targets.clone(), settings)?
        };

        let interceptors = ClientInterceptors::new(tracer, config.timeout(), config.retry.policy());
        Ok(Self::new(&RpcClient::new(Arc::new(pool), interceptors)))
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    pub async fn get_tag_list(&self, request: GetTagListRequest) -> Result<GetTagListReply, Status> {
        self.get_tag_list_with(CallContext::new(GET_TAG_LIST), request).await
    }

    /// Call with a caller-supplied context (deadline, metadata, parent span).
    pub async fn get_tag_list_with(
        &self,
        ctx: CallContext,
        request: GetTagListRequest,
    ) -> Result<GetTagListReply, Status> {
        self.get_tag_list.call(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopTracer;
    use crate::registry::MemoryStore;

    #[tokio::test]
    async fn static_targets_skip_discovery() {
        let registry = Registry::new(Arc::new(MemoryStore::new()), "test");
        let config = ClientConfig {
            targets: vec!["127.0.0.1:7001".to_owned(), "127.0.0.1:7002".to_owned()],
            ..Default::default()
        };
        let client = TagServiceClient::connect(&config, &registry, Arc::new(NoopTracer))
            .await
            .unwrap();
        assert_eq!(client.pool().endpoints().len(), 2);
    }

    #[tokio::test]
    async fn discovery_with_no_instances_fails_calls_as_unavailable() {
        let registry = Registry::new(Arc::new(MemoryStore::new()), "test");
        let client = TagServiceClient::connect(&ClientConfig::default(), &registry, Arc::new(NoopTracer))
            .await
            .unwrap();
        let err = client.get_tag_list(GetTagListRequest::default()).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unavailable);
    }
}
