//! Request ID helpers.
//!
//! IDs are assigned by `tower_http::request_id` in the router stack
//! (see `routes.rs`). An inbound `x-request-id` is kept as is.

use http::HeaderMap;

pub const X_REQUEST_ID: &str = "x-request-id";

/// The request ID header, if present and printable.
pub fn request_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn reads_request_id_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(request_id(&headers), None);
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        assert_eq!(request_id(&headers), Some("abc-123"));
    }
}
