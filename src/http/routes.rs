//! The plain HTTP side of the mux.

use std::time::Duration;

use axum::{response::IntoResponse, routing::get, Json, Router};
use http::StatusCode;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::gateway::HttpError;

/// `/ping`, the gateway routes, and a JSON 404 for everything else.
#[allow(deprecated)]
pub fn build_router(gateway: Router, request_timeout: Duration) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .merge(gateway)
        .fallback(not_found)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn ping() -> &'static str {
    "pong"
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(HttpError::not_found()))
}
