//! Business error codes and structured status details.
//!
//! A business failure travels as a `tonic::Status` whose
//! `grpc-status-details-bin` holds a `google.rpc.Status` with one packed
//! `tag.Error { code, message }`. Gateways and clients unpack it to recover
//! the domain code.

use bytes::Bytes;
use prost::Message;
use tonic::{Code, Status};

const ERROR_DETAIL_TYPE_URL: &str = "type.googleapis.com/tag.Error";

/// `tag.Error`: the structured detail attached to business failures.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ErrorDetail {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

/// `google.rpc.Status`, the envelope carried in `grpc-status-details-bin`.
#[derive(Clone, PartialEq, ::prost::Message)]
struct RpcStatus {
    #[prost(int32, tag = "1")]
    code: i32,
    #[prost(string, tag = "2")]
    message: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "3")]
    details: ::prost::alloc::vec::Vec<::prost_types::Any>,
}

/// A fixed business error code and its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode {
    code: i32,
    message: &'static str,
}

impl ErrorCode {
    pub const fn new(code: i32, message: &'static str) -> Self {
        Self { code, message }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &'static str {
        self.message
    }

    /// The gRPC code this business error is reported under.
    pub fn rpc_code(&self) -> Code {
        match *self {
            FAIL => Code::Internal,
            INVALID_PARAMS => Code::InvalidArgument,
            UNAUTHORIZED => Code::Unauthenticated,
            ACCESS_DENIED => Code::PermissionDenied,
            DEADLINE_EXCEEDED => Code::DeadlineExceeded,
            NOT_FOUND => Code::NotFound,
            LIMIT_EXCEEDED => Code::ResourceExhausted,
            METHOD_NOT_ALLOWED => Code::Unimplemented,
            _ => Code::Unknown,
        }
    }

    /// Build the status for this error, with the structured detail attached.
    pub fn to_status(&self) -> Status {
        with_error_detail(
            self.rpc_code(),
            self.message,
            ErrorDetail {
                code: self.code,
                message: self.message.to_owned(),
            },
        )
    }
}

pub const FAIL: ErrorCode = ErrorCode::new(10000000, "internal server error");
pub const INVALID_PARAMS: ErrorCode = ErrorCode::new(10000001, "invalid params");
pub const UNAUTHORIZED: ErrorCode = ErrorCode::new(10000002, "unauthorized");
pub const ACCESS_DENIED: ErrorCode = ErrorCode::new(10000003, "access denied");
pub const DEADLINE_EXCEEDED: ErrorCode = ErrorCode::new(10000004, "deadline exceeded");
pub const NOT_FOUND: ErrorCode = ErrorCode::new(10000005, "not found");
pub const LIMIT_EXCEEDED: ErrorCode = ErrorCode::new(10000006, "too many requests");
pub const METHOD_NOT_ALLOWED: ErrorCode = ErrorCode::new(10000007, "method not allowed");

pub const GET_TAG_LIST_FAIL: ErrorCode = ErrorCode::new(20010001, "failed to get tag list");

/// Build a status whose details carry `detail` packed into `google.rpc.Status`.
pub fn with_error_detail(code: Code, message: &str, detail: ErrorDetail) -> Status {
    let envelope = RpcStatus {
        code: code as i32,
        message: message.to_owned(),
        details: vec![::prost_types::Any {
            type_url: ERROR_DETAIL_TYPE_URL.to_owned(),
            value: detail.encode_to_vec(),
        }],
    };
    Status::with_details(code, message, Bytes::from(envelope.encode_to_vec()))
}

/// Extract the structured business detail, if the status carries one.
pub fn error_detail(status: &Status) -> Option<ErrorDetail> {
    let details = status.details();
    if details.is_empty() {
        return None;
    }
    let envelope = RpcStatus::decode(details).ok()?;
    envelope
        .details
        .iter()
        .find(|any| any.type_url == ERROR_DETAIL_TYPE_URL)
        .and_then(|any| ErrorDetail::decode(any.value.as_slice()).ok())
}

/// Parse a canonical code name (`UNAVAILABLE`, `DeadlineExceeded`, ...).
pub fn parse_code(name: &str) -> Option<Code> {
    let normalized: String = name
        .chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect();
    let code = match normalized.as_str() {
        "ok" => Code::Ok,
        "cancelled" | "canceled" => Code::Cancelled,
        "unknown" => Code::Unknown,
        "invalidargument" => Code::InvalidArgument,
        "deadlineexceeded" => Code::DeadlineExceeded,
        "notfound" => Code::NotFound,
        "alreadyexists" => Code::AlreadyExists,
        "permissiondenied" => Code::PermissionDenied,
        "resourceexhausted" => Code::ResourceExhausted,
        "failedprecondition" => Code::FailedPrecondition,
        "aborted" => Code::Aborted,
        "outofrange" => Code::OutOfRange,
        "unimplemented" => Code::Unimplemented,
        "internal" => Code::Internal,
        "unavailable" => Code::Unavailable,
        "dataloss" => Code::DataLoss,
        "unauthenticated" => Code::Unauthenticated,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_error_carries_detail() {
        let status = GET_TAG_LIST_FAIL.to_status();
        assert_eq!(status.code(), Code::Unknown);
        assert_eq!(status.message(), "failed to get tag list");

        let detail = error_detail(&status).expect("detail present");
        assert_eq!(detail.code, 20010001);
        assert_eq!(detail.message, "failed to get tag list");
    }

    #[test]
    fn plain_status_has_no_detail() {
        assert!(error_detail(&Status::deadline_exceeded("deadline exceeded")).is_none());
        assert!(error_detail(&Status::with_details(Code::Internal, "x", Bytes::from_static(b"\xff\xff"))).is_none());
    }

    #[test]
    fn fail_maps_to_internal() {
        assert_eq!(FAIL.rpc_code(), Code::Internal);
        assert_eq!(NOT_FOUND.rpc_code(), Code::NotFound);
    }

    #[test]
    fn parses_code_names() {
        assert_eq!(parse_code("UNAVAILABLE"), Some(Code::Unavailable));
        assert_eq!(parse_code("deadline_exceeded"), Some(Code::DeadlineExceeded));
        assert_eq!(parse_code("DeadlineExceeded"), Some(Code::DeadlineExceeded));
        assert_eq!(parse_code("bogus"), None);
    }
}
