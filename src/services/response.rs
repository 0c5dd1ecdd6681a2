//! HTTP response building helpers
//!
//! Provides a consistent API for building HTTP responses across all handlers.
//! Error bodies are always `{"error": "..."}`.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::{Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::error::ResolveError;

/// Message returned for every failure the caller cannot act on
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

fn with_body(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Build a JSON response with the given status code
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(json) => with_body(status, "application/json", Bytes::from(json)),
        Err(e) => {
            error!(error = %e, "Failed to serialize response body");
            with_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "application/json",
                Bytes::from_static(br#"{"error":"Internal server error"}"#),
            )
        }
    }
}

fn error_body(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "error": message }))
}

/// Build a JSON response with 200 OK status
pub fn ok<T: Serialize>(body: &T) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, body)
}

/// Build a plain-text 200 OK response
pub fn text(body: &'static str) -> Response<Full<Bytes>> {
    with_body(StatusCode::OK, "text/plain; charset=utf-8", Bytes::from_static(body.as_bytes()))
}

/// Build a 400 Bad Request response with message
pub fn bad_request(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::BAD_REQUEST, message)
}

/// Build a 404 Not Found response with message
pub fn not_found(message: &str) -> Response<Full<Bytes>> {
    error_body(StatusCode::NOT_FOUND, message)
}

/// Build a 405 Method Not Allowed response
pub fn method_not_allowed(allow: &'static str) -> Response<Full<Bytes>> {
    let mut response = error_body(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(allow));
    response
}

/// Build a 413 Payload Too Large response
pub fn payload_too_large(limit: usize) -> Response<Full<Bytes>> {
    error_body(
        StatusCode::PAYLOAD_TOO_LARGE,
        &format!("Request body exceeds {} bytes", limit),
    )
}

/// Build a 500 Internal Server Error response
///
/// The body never carries the underlying error.
pub fn internal_error() -> Response<Full<Bytes>> {
    error_body(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
}

/// Convert a ResolveError to an appropriate HTTP response
pub fn resolve_error_response(err: &ResolveError) -> Response<Full<Bytes>> {
    match err {
        ResolveError::MissingIdentity => bad_request(&err.to_string()),
        ResolveError::Storage(e) => {
            error!(error = %e, "Identify request failed");
            internal_error()
        }
    }
}

/// Result type alias for handlers
pub type HandlerResult = Result<Response<Full<Bytes>>, ResolveError>;

/// Wrap a service result into an HTTP response
pub fn from_result<T: Serialize>(result: Result<T, ResolveError>) -> Response<Full<Bytes>> {
    match result {
        Ok(value) => ok(&value),
        Err(e) => resolve_error_response(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use http_body_util::BodyExt;

    async fn body_json(resp: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_ok_response() {
        let resp = ok(&serde_json::json!({"test": true}));
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_missing_identity_is_bad_request() {
        let resp = resolve_error_response(&ResolveError::MissingIdentity);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(resp).await,
            serde_json::json!({ "error": "email or phone number required" })
        );
    }

    #[tokio::test]
    async fn test_storage_error_hides_details() {
        let err = ResolveError::Storage(StorageError::Internal("disk on fire".into()));
        let resp = resolve_error_response(&err);
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(resp).await,
            serde_json::json!({ "error": "Internal server error" })
        );
    }

    #[test]
    fn test_method_not_allowed_sets_allow_header() {
        let resp = method_not_allowed("POST");
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers()[header::ALLOW], "POST");
    }
}
