//! Server-side service trait and its registration.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::Status;

use crate::gateway::GatewayBuilder;
use crate::interceptor::Handler;
use crate::rpc::method::MethodTableBuilder;
use crate::rpc::CallContext;
use crate::tag::proto::{GetTagListReply, GetTagListRequest, GET_TAG_LIST};

#[async_trait]
pub trait TagService: Send + Sync + 'static {
    async fn get_tag_list(
        &self,
        ctx: CallContext,
        request: GetTagListRequest,
    ) -> Result<GetTagListReply, Status>;
}

/// Add every method of `service` to the table.
pub fn register(builder: MethodTableBuilder, service: Arc<dyn TagService>) -> MethodTableBuilder {
    builder.unary(
        GET_TAG_LIST,
        Handler::from_fn(move |ctx, request: GetTagListRequest| {
            let service = Arc::clone(&service);
            async move { service.get_tag_list(ctx, request).await }
        }),
    )
}

/// REST routes for the service: `GET|POST /api/v1/tags`.
pub fn register_gateway(builder: GatewayBuilder) -> GatewayBuilder {
    builder
        .get::<GetTagListRequest, GetTagListReply>("/api/v1/tags", GET_TAG_LIST)
        .post::<GetTagListRequest, GetTagListReply>("/api/v1/tags", GET_TAG_LIST)
}
