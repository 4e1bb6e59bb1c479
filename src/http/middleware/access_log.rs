//! Access log stage.
//!
//! Installs the write-once [`ResponseGuard`] into request extensions before
//! the request reaches the handler, then emits one event once the response
//! is ready:
//!
//! ```text
//! caller method target protocol status size user_agent elapsed_us
//! ```
//!
//! Status and size come from the guard when the handler committed them,
//! otherwise from the response an outer stage produced (timeout, favicon,
//! CORS preflight).

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::http::request::client_ip;
use crate::http::response::ResponseGuard;
use crate::observability::metrics;
use crate::routing::resolve;

pub async fn access_log(mut request: Request, next: Next) -> Response {
    let start = Instant::now();

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let caller = client_ip(request.headers(), peer);
    let method = request.method().clone();
    let target = request
        .uri()
        .path_and_query()
        .and_then(|pq| resolve(pq.as_str()).ok())
        .map(|dest| dest.to_string())
        .unwrap_or_else(|| "-".to_string());
    let protocol = format!("{:?}", request.version());
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();

    let guard = ResponseGuard::new();
    request.extensions_mut().insert(guard.clone());

    let response = next.run(request).await;

    let status = guard.status().unwrap_or(response.status());
    let size = match guard.size() {
        0 => response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        size => size,
    };

    tracing::info!(
        request_id = %request_id,
        caller = %caller,
        method = %method,
        target = %target,
        protocol = %protocol,
        status = status.as_u16(),
        size = size,
        user_agent = %user_agent,
        elapsed_us = start.elapsed().as_micros() as u64,
        "Request completed"
    );
    metrics::record_request(method.as_str(), status.as_u16(), start);

    response
}
