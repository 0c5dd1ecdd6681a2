//! HTTP API for contact identity resolution
//!
//! ## Endpoints
//! - `GET /` - Liveness banner
//! - `GET /health` - Health check with contact counts
//! - `POST /identify` - Resolve an email/phone pair into a contact cluster
//!
//! ## Example Usage
//!
//! ```bash
//! curl -X POST -H "Content-Type: application/json" \
//!      -d '{"email": "a@x.com", "phoneNumber": "111"}' \
//!      http://localhost:3000/identify
//! # {"contact":{"primaryContactId":1,"emails":["a@x.com"],"phoneNumbers":["111"],"secondaryContactIds":[]}}
//! ```

use crate::error::StorageError;
use crate::services::response::{self, HandlerResult};
use crate::services::{IdentifyRequest, IdentifyService};
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Default request body limit
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024;

/// HTTP server state
pub struct HttpServer {
    identify: Arc<IdentifyService>,
    bind_addr: SocketAddr,
    max_body_bytes: usize,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(identify: Arc<IdentifyService>, bind_addr: SocketAddr) -> Self {
        Self {
            identify,
            bind_addr,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    /// Set the request body limit
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// Run the HTTP server
    pub async fn run(self: Arc<Self>) -> Result<(), StorageError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "HTTP server listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    /// Read the body within the size limit, then route
    async fn handle_request(
        self: Arc<Self>,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, Infallible> {
        let (parts, body) = req.into_parts();

        let body = match read_body(body, self.max_body_bytes).await {
            Ok(body) => body,
            Err(resp) => return Ok(resp),
        };

        Ok(self.dispatch(parts.method, parts.uri.path().to_string(), body).await)
    }

    /// Run `route` on the blocking pool
    ///
    /// Routing takes the database mutex and may wait on SQLite's busy timeout,
    /// which must not stall a runtime worker.
    pub async fn dispatch(
        self: Arc<Self>,
        method: Method,
        path: String,
        body: Bytes,
    ) -> Response<Full<Bytes>> {
        match tokio::task::spawn_blocking(move || self.route(&method, &path, body)).await {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, "Request handler panicked");
                response::internal_error()
            }
        }
    }

    /// Route a request with an already collected body
    pub fn route(&self, method: &Method, path: &str, body: Bytes) -> Response<Full<Bytes>> {
        debug!(method = %method, path = %path, "Incoming request");

        let result = match (method, path) {
            (&Method::GET, "/") => Ok(response::text("Contact identity service is running")),
            (&Method::GET, "/health") => self.handle_health(),
            (&Method::POST, "/identify") => self.handle_identify(&body),
            (_, "/identify") => Ok(response::method_not_allowed("POST")),
            _ => Ok(response::not_found("Not found")),
        };

        result.unwrap_or_else(|e| response::resolve_error_response(&e))
    }

    /// Health check endpoint
    fn handle_health(&self) -> HandlerResult {
        let stats = self.identify.stats()?;
        Ok(response::ok(&serde_json::json!({
            "status": "ok",
            "contacts": stats.contacts,
            "primaries": stats.primaries,
            "secondaries": stats.secondaries,
        })))
    }

    /// POST /identify - Resolve an identity
    fn handle_identify(&self, body: &Bytes) -> HandlerResult {
        let request: IdentifyRequest = match serde_json::from_slice(body) {
            Ok(request) => request,
            Err(e) => return Ok(response::bad_request(&format!("Invalid JSON body: {}", e))),
        };

        Ok(response::from_result(self.identify.identify(&request)))
    }
}

/// Collect a request body, refusing anything over `limit` bytes
async fn read_body<B>(body: B, limit: usize) -> Result<Bytes, Response<Full<Bytes>>>
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(response::payload_too_large(limit))
        }
        Err(e) => {
            warn!(error = %e, "Failed to read request body");
            Err(response::bad_request("Failed to read request body"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ContactDb;
    use crate::services::Services;
    use hyper::StatusCode;

    fn server() -> HttpServer {
        let db = Arc::new(ContactDb::open_in_memory().unwrap());
        let services = Services::new(db);
        HttpServer::new(services.identify, "127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_root_banner() {
        let resp = server().route(&Method::GET, "/", Bytes::new());
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_unknown_route() {
        let resp = server().route(&Method::GET, "/contacts", Bytes::new());
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_oversized_body_is_rejected() {
        let body = Full::new(Bytes::from(vec![b'x'; 128]));
        let resp = read_body(body, 64).await.unwrap_err();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let body = Full::new(Bytes::from_static(b"{}"));
        assert_eq!(read_body(body, 64).await.unwrap(), Bytes::from_static(b"{}"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_dispatch_routes_off_the_runtime_thread() {
        let server = Arc::new(server());

        let resp = Arc::clone(&server)
            .dispatch(
                Method::POST,
                "/identify".to_string(),
                Bytes::from_static(br#"{"email":"a@x.com"}"#),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = server
            .dispatch(Method::GET, "/health".to_string(), Bytes::new())
            .await;
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let health: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(health["contacts"], 1);
    }

    #[test]
    fn test_empty_body_is_bad_request() {
        let resp = server().route(&Method::POST, "/identify", Bytes::new());
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
