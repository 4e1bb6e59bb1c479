//! Error types for the proxy pipeline.

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::security::cipher::CipherError;

/// Terminal failures of a proxied request.
///
/// Each variant maps to exactly one status code. The error text is for logs
/// only; callers observe nothing but the status.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed request target: {0}")]
    MalformedTarget(String),

    #[error("method {0} is not allowed")]
    MethodNotAllowed(String),

    #[error("host {0:?} denied by policy")]
    HostDenied(String),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream failed with status {status}: {reason}")]
    UpstreamPartialFailure { status: StatusCode, reason: String },

    #[error("failed to read body: {0}")]
    BodyRead(#[source] std::io::Error),

    #[error("failed to encrypt response: {0}")]
    Encryption(#[from] CipherError),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MalformedTarget(_) => StatusCode::BAD_REQUEST,
            ProxyError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::HostDenied(_) => StatusCode::FORBIDDEN,
            ProxyError::UpstreamPartialFailure { status, .. } => *status,
            ProxyError::UpstreamUnreachable(_)
            | ProxyError::BodyRead(_)
            | ProxyError::Encryption(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MalformedTarget(_) => "malformed_target",
            ProxyError::MethodNotAllowed(_) => "method_not_allowed",
            ProxyError::HostDenied(_) => "host_denied",
            ProxyError::UpstreamUnreachable(_) => "upstream_unreachable",
            ProxyError::UpstreamPartialFailure { .. } => "upstream_partial_failure",
            ProxyError::BodyRead(_) => "body_read",
            ProxyError::Encryption(_) => "encryption",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = self.status_code();
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ProxyError::MalformedTarget("/".into()).status_code(), 400);
        assert_eq!(ProxyError::MethodNotAllowed("PUT".into()).status_code(), 405);
        assert_eq!(ProxyError::HostDenied("evil.test".into()).status_code(), 403);
        assert_eq!(ProxyError::UpstreamUnreachable("refused".into()).status_code(), 500);
        assert_eq!(
            ProxyError::UpstreamPartialFailure {
                status: StatusCode::BAD_GATEWAY,
                reason: "reset".into()
            }
            .status_code(),
            502
        );
        let io = std::io::Error::other("truncated gzip");
        assert_eq!(ProxyError::BodyRead(io).status_code(), 500);
        assert_eq!(
            ProxyError::Encryption(CipherError::KeyLength(3)).status_code(),
            500
        );
    }
}
