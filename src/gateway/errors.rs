//! Status → HTTP error translation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tonic::{Code, Status};

use crate::rpc::status::error_detail;

/// HTTP status for each gRPC code.
pub fn http_status_from_code(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        // 499 Client Closed Request has no named constant.
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::BAD_REQUEST,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
    }
}

/// JSON error body returned to HTTP clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpError {
    pub code: i32,
    pub message: String,
}

impl HttpError {
    /// Code and message from the status, replaced by the business detail if one is attached.
    pub fn from_status(status: &Status) -> Self {
        match error_detail(status) {
            Some(detail) => Self {
                code: detail.code,
                message: detail.message,
            },
            None => Self {
                code: status.code() as i32,
                message: status.message().to_owned(),
            },
        }
    }

    pub fn not_found() -> Self {
        Self {
            code: Code::NotFound as i32,
            message: "Not Found".to_owned(),
        }
    }
}

pub fn error_response(status: &Status) -> Response {
    let http_status = http_status_from_code(status.code());
    (http_status, Json(HttpError::from_status(status))).into_response()
}
