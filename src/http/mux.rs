//! Per-request protocol split.

use axum::body::Body;
use axum::Router;
use http::{header::CONTENT_TYPE, Request, Response, Version};
use tower::ServiceExt;

use crate::rpc::RpcServer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    BinaryRpc,
    HttpJson,
}

impl RouteDecision {
    /// gRPC is HTTP/2 with an `application/grpc*` content type. Anything
    /// else, including `application/grpc` over HTTP/1.1, goes to HTTP.
    pub fn classify<B>(request: &Request<B>) -> Self {
        let grpc_content = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/grpc"));

        if request.version() == Version::HTTP_2 && grpc_content {
            RouteDecision::BinaryRpc
        } else {
            RouteDecision::HttpJson
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProtocolMux {
    rpc: RpcServer,
    router: Router,
}

impl ProtocolMux {
    pub fn new(rpc: RpcServer, router: Router) -> Self {
        Self { rpc, router }
    }

    pub async fn route(&self, request: Request<Body>) -> Response<Body> {
        match RouteDecision::classify(&request) {
            RouteDecision::BinaryRpc => self.rpc.handle(request).await.map(Body::new),
            RouteDecision::HttpJson => match self.router.clone().oneshot(request).await {
                Ok(response) => response,
                Err(never) => match never {},
            },
        }
    }
}
