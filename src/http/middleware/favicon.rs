//! Short-circuit for browsers probing `/favicon.ico`.

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

const FAVICON_PATH: &str = "/favicon.ico";

pub async fn favicon_dodge(request: Request, next: Next) -> Response {
    if request.uri().path() == FAVICON_PATH {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(request).await
}
