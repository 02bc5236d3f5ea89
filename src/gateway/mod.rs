//! HTTP/JSON gateway.
//!
//! # Data Flow
//! ```text
//! GET /api/v1/tags?name=..  |  POST /api/v1/tags {json}
//!     → decode query/body into the request message
//!     → CallContext from headers (grpc-timeout, traceparent)
//!     → typed method lookup → composed server pipeline (in-process)
//!     → 200 + JSON reply | error status + {"code","message"}
//! ```
//!
//! # Design Decisions
//! - No loopback gRPC hop: the gateway calls the same pipeline the gRPC
//!   dispatcher uses, so interceptors run exactly once per call
//! - Malformed input is `INVALID_ARGUMENT` (400) in the same error shape

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tonic::metadata::MetadataMap;
use tonic::Status;

use crate::rpc::{CallContext, MethodTable};

pub mod errors;

pub use errors::{error_response, http_status_from_code, HttpError};

/// Context of a gateway call: `grpc-timeout` and `traceparent` headers are honored.
pub fn context_from_headers(method: &str, headers: &HeaderMap) -> CallContext {
    CallContext::from_metadata(method, MetadataMap::from_headers(headers.clone()))
}

/// Collects REST routes that map onto registered unary methods.
#[derive(Debug)]
pub struct GatewayBuilder {
    table: Arc<MethodTable>,
    router: Router,
}

impl GatewayBuilder {
    pub fn new(table: Arc<MethodTable>) -> Self {
        Self {
            table,
            router: Router::new(),
        }
    }

    /// `GET route` with the request decoded from the query string.
    pub fn get<Req, Res>(mut self, route: &str, method: &'static str) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
    {
        let table = Arc::clone(&self.table);
        self.router = self.router.route(
            route,
            get(move |headers: HeaderMap, query: Result<Query<Req>, QueryRejection>| {
                let table = Arc::clone(&table);
                async move {
                    match query {
                        Ok(Query(req)) => dispatch::<Req, Res>(&table, method, &headers, req).await,
                        Err(rejection) => error_response(&Status::invalid_argument(rejection.body_text())),
                    }
                }
            }),
        );
        self
    }

    /// `POST route` with the request decoded from a JSON body.
    pub fn post<Req, Res>(mut self, route: &str, method: &'static str) -> Self
    where
        Req: DeserializeOwned + Send + 'static,
        Res: Serialize + Send + 'static,
    {
        let table = Arc::clone(&self.table);
        self.router = self.router.route(
            route,
            post(move |headers: HeaderMap, body: Result<Json<Req>, JsonRejection>| {
                let table = Arc::clone(&table);
                async move {
                    match body {
                        Ok(Json(req)) => dispatch::<Req, Res>(&table, method, &headers, req).await,
                        Err(rejection) => error_response(&Status::invalid_argument(rejection.body_text())),
                    }
                }
            }),
        );
        self
    }

    pub fn build(self) -> Router {
        self.router
    }
}

async fn dispatch<Req, Res>(table: &MethodTable, method: &'static str, headers: &HeaderMap, req: Req) -> Response
where
    Req: Send + 'static,
    Res: Serialize + Send + 'static,
{
    let Some(unary) = table.unary::<Req, Res>(method) else {
        tracing::error!(method, "Gateway route points at an unregistered method");
        return error_response(&Status::unimplemented(format!("method {method} not registered")));
    };

    let ctx = context_from_headers(method, headers);
    match unary.call(ctx, req).await {
        Ok(reply) => Json(reply).into_response(),
        Err(status) => error_response(&status),
    }
}
