//! Inbound request extraction.
//!
//! # Responsibilities
//! - Capture method, raw target, headers and body of the caller's request
//! - Extract the bearer credential that feeds key derivation
//! - Work out the caller address for logging
//!
//! # Design Decisions
//! - The raw target is kept undecoded; resolution happens in the pipeline
//! - `Authorization` is read, never stripped

use std::net::{IpAddr, SocketAddr};

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, Version};

/// The caller's request as the pipeline sees it.
#[derive(Debug)]
pub struct IncomingRequest {
    pub method: Method,
    /// Path and query exactly as received.
    pub target: String,
    pub headers: HeaderMap,
    pub body: Body,
    pub version: Version,
    /// Best-effort client address.
    pub caller: String,
    /// Bearer token from `Authorization`, whitespace-trimmed and non-empty.
    pub credential: Option<String>,
}

impl IncomingRequest {
    pub fn new(request: Request<Body>, peer: Option<SocketAddr>) -> Self {
        let (parts, body) = request.into_parts();
        let target = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let caller = client_ip(&parts.headers, peer);
        let credential = bearer_credential(&parts.headers);

        Self {
            method: parts.method,
            target,
            headers: parts.headers,
            body,
            version: parts.version,
            caller,
            credential,
        }
    }

    pub fn user_agent(&self) -> &str {
        self.headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
    }

    pub fn protocol(&self) -> String {
        format!("{:?}", self.version)
    }
}

/// Token following the `Bearer` scheme in `Authorization`.
pub fn bearer_credential(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Peer address if known; otherwise the last valid `X-Forwarded-For` hop,
/// then `X-Real-Ip`.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(peer) = peer {
        return peer.ip().to_string();
    }

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|xff| xff.trim_matches(',').rsplit(',').next())
        .and_then(|last| last.trim().parse::<IpAddr>().ok());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "-".to_string())
}
