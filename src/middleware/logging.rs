//! Request-id generation and request/response logging

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::HeaderValue;
use std::time::Instant;
use tower_http::request_id::{MakeRequestId, RequestId};
use tracing::info;
use uuid::Uuid;

/// Generates a UUID v4 request id for every incoming request
#[derive(Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &http::Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Logs method, path, status and latency for every request
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let started = Instant::now();
    let response = next.run(request).await;
    let latency_ms = started.elapsed().as_millis();

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = latency_ms as u64,
        request_id = %request_id,
        "request completed"
    );

    response
}
