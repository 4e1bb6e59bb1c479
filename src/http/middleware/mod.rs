//! Middleware stages wrapped around the proxy handler.
//!
//! # Data Flow
//! ```text
//! Request → RequestId → AccessLog → Timeout → FaviconDodge
//!         → Compression → Cors → proxy handler
//! ```
//!
//! # Design Decisions
//! - The stage list is plain data built from configuration, so ordering and
//!   enablement are testable without running a server
//! - `apply` folds the list onto the router innermost-first; axum wraps each
//!   new layer around everything added before it

pub mod access_log;
pub mod cors;
pub mod favicon;

use std::time::Duration;

use axum::http::{Extensions, HeaderMap, HeaderName, StatusCode, Version};
use axum::Router;
use tower_http::compression::predicate::{DefaultPredicate, Predicate};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;

use crate::config::ProxyConfig;

/// One layer of the middleware stack.
#[derive(Debug, Clone)]
pub enum Stage {
    /// Set `x-request-id` when absent and echo it on the response.
    RequestId,
    /// One structured access event per request, plus request metrics.
    AccessLog,
    /// Whole-request deadline.
    Timeout(Duration),
    /// Answer `/favicon.ico` with 204 before the pipeline.
    FaviconDodge,
    /// Gzip pass-through responses for clients that accept it. Responses
    /// whose signal header (carried here) reads `"true"` are left alone.
    Compression(HeaderName),
    Cors(CorsLayer),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::RequestId => "request_id",
            Stage::AccessLog => "access_log",
            Stage::Timeout(_) => "timeout",
            Stage::FaviconDodge => "favicon_dodge",
            Stage::Compression(_) => "compression",
            Stage::Cors(_) => "cors",
        }
    }
}

/// Enabled stages, outermost first.
pub fn stages(config: &ProxyConfig) -> Vec<Stage> {
    let mut stages = vec![Stage::RequestId, Stage::AccessLog];
    if let Some(limit) = config.timeouts.client() {
        stages.push(Stage::Timeout(limit));
    }
    stages.push(Stage::FaviconDodge);
    if config.general.compress_responses {
        if let Ok(signal) = HeaderName::try_from(config.general.is_encrypted_header_key.as_str()) {
            stages.push(Stage::Compression(signal));
        }
    }
    if let Some(layer) = cors::layer(config) {
        stages.push(Stage::Cors(layer));
    }
    stages
}

/// Wrap `router` in `stages`, the first entry ending up outermost.
#[allow(deprecated)]
pub fn apply(router: Router, stages: Vec<Stage>) -> Router {
    stages.into_iter().rev().fold(router, |router, stage| match stage {
        Stage::RequestId => router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid)),
        Stage::AccessLog => router.layer(axum::middleware::from_fn(access_log::access_log)),
        Stage::Timeout(limit) => router.layer(TimeoutLayer::new(limit)),
        Stage::FaviconDodge => router.layer(axum::middleware::from_fn(favicon::favicon_dodge)),
        Stage::Compression(signal) => {
            router.layer(CompressionLayer::new().compress_when(plaintext_only(signal)))
        }
        Stage::Cors(layer) => router.layer(layer),
    })
}

/// Compress only bodies not marked encrypted; ciphertext keeps its
/// recomputed `Content-Length`.
fn plaintext_only(signal: HeaderName) -> impl Predicate {
    DefaultPredicate::new().and(
        move |_: StatusCode, _: Version, headers: &HeaderMap, _: &Extensions| {
            headers.get(&signal).map_or(true, |v| v != "true")
        },
    )
}
