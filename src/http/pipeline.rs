//! The request-to-response pipeline.
//!
//! # State Machine
//! ```text
//! Received → MethodChecked → TargetResolved → PolicyChecked → Forwarded
//!     → BodyRead → (Encrypted | PassThrough) → Sent
//!
//! Any failed transition ends in Rejected/Failed with one status code.
//! OPTIONS and HEAD stop after Forwarded: status and headers only, no body
//! read. `Sent` is reached in the response writer.
//! ```
//!
//! # Design Decisions
//! - Method and policy checks run before any network access
//! - Request and response bodies are truncated at their ceilings
//! - gzip upstream bodies are decoded before the ceiling and encryption
//! - The caller only ever sees a status code on failure; details are logged

use std::collections::HashSet;

use axum::http::{header, HeaderMap, Method};
use thiserror::Error;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::client::{UpstreamClient, UpstreamError};
use crate::http::request::IncomingRequest;
use crate::http::response::ProxyResult;
use crate::observability::metrics;
use crate::routing::{resolve, ResolvedDestination};
use crate::security::{cipher, headers, limits, AccessPolicy, Decision, PolicyError};

/// Progress of a single request through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    MethodChecked,
    TargetResolved,
    PolicyChecked,
    Forwarded,
    BodyRead,
    Encrypted,
    PassThrough,
    /// The response has been handed to the server.
    Sent,
}

/// Failure constructing the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid host pattern: {0}")]
    Policy(#[from] PolicyError),

    #[error("failed to build outbound client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Request fields every log line carries.
struct LogContext {
    caller: String,
    method: Method,
    target: String,
    protocol: String,
    user_agent: String,
}

impl LogContext {
    fn new(request: &IncomingRequest) -> Self {
        Self {
            caller: request.caller.clone(),
            method: request.method.clone(),
            target: request.target.clone(),
            protocol: request.protocol(),
            user_agent: request.user_agent().to_string(),
        }
    }
}

/// Orchestrates resolution, policy, forwarding and encryption.
#[derive(Debug, Clone)]
pub struct ProxyPipeline {
    policy: AccessPolicy,
    client: UpstreamClient,
    allowed_methods: HashSet<Method>,
    shared_key_salt: String,
    max_request_bytes: u64,
    max_response_bytes: u64,
}

impl ProxyPipeline {
    pub fn from_config(config: &ProxyConfig) -> Result<Self, PipelineError> {
        let general = &config.general;
        let policy = AccessPolicy::new(&general.allowed_hosts, &general.disallowed_hosts)?;
        let client = UpstreamClient::from_config(config, policy.clone())?;
        let allowed_methods = general
            .allowed_methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.as_bytes()).ok())
            .collect();

        Ok(Self {
            policy,
            client,
            allowed_methods,
            shared_key_salt: general.shared_key_salt.trim().to_string(),
            max_request_bytes: config.limits.max_request_bytes(),
            max_response_bytes: config.limits.max_response_bytes(),
        })
    }

    /// Run one request to completion.
    pub async fn handle(&self, request: IncomingRequest) -> Result<ProxyResult, ProxyError> {
        let ctx = LogContext::new(&request);
        let mut state = PipelineState::Received;

        if !self.allowed_methods.contains(&request.method) {
            tracing::warn!(
                caller = %ctx.caller,
                method = %ctx.method,
                target = %ctx.target,
                protocol = %ctx.protocol,
                "Method not allowed"
            );
            return Err(ProxyError::MethodNotAllowed(ctx.method.to_string()));
        }
        advance(&mut state, PipelineState::MethodChecked);

        let destination = resolve(&request.target).map_err(|e| {
            tracing::warn!(
                caller = %ctx.caller,
                method = %ctx.method,
                target = %ctx.target,
                protocol = %ctx.protocol,
                error = %e,
                "Invalid request target"
            );
            ProxyError::MalformedTarget(ctx.target.clone())
        })?;
        tracing::debug!(
            target = %destination,
            encoding = ?destination.encoding(),
            path = %destination.path_and_query(),
            "Resolved destination"
        );
        advance(&mut state, PipelineState::TargetResolved);

        let decision = self
            .policy
            .check_with_aliases(destination.host(), &destination.aliases());
        if decision != Decision::Allowed {
            tracing::warn!(
                caller = %ctx.caller,
                method = %ctx.method,
                target = %destination,
                protocol = %ctx.protocol,
                host = %destination.host(),
                decision = ?decision,
                "Denying request to host"
            );
            metrics::record_denied(decision);
            return Err(ProxyError::HostDenied(destination.host().to_string()));
        }
        advance(&mut state, PipelineState::PolicyChecked);

        let IncomingRequest {
            method,
            headers: inbound_headers,
            body,
            credential,
            ..
        } = request;

        let body = limits::read_request_body(body, self.max_request_bytes)
            .await
            .map_err(|e| {
                tracing::error!(
                    caller = %ctx.caller,
                    method = %ctx.method,
                    target = %destination,
                    protocol = %ctx.protocol,
                    error = %e,
                    "Couldn't read request body"
                );
                ProxyError::BodyRead(e)
            })?;

        let upstream = self
            .client
            .send(
                method.clone(),
                destination.url().clone(),
                outbound_headers(&inbound_headers),
                body,
            )
            .await
            .map_err(|e| upstream_failure(&ctx, &destination, e))?;
        advance(&mut state, PipelineState::Forwarded);

        let status = upstream.response.status();
        let mut relay_headers = upstream.response.headers().clone();
        headers::strip_hop_by_hop(&mut relay_headers);

        if method == Method::OPTIONS || method == Method::HEAD {
            return Ok(ProxyResult {
                status,
                headers: relay_headers,
                body: None,
                encrypted: false,
            });
        }

        let gzip = is_gzip(&relay_headers);
        // The per-host slot stays held by `upstream` until the body is read.
        let stream = upstream.response.bytes_stream();
        let plaintext = limits::read_response_body(stream, gzip, self.max_response_bytes)
            .await
            .map_err(|e| {
                tracing::error!(
                    caller = %ctx.caller,
                    method = %ctx.method,
                    target = %destination,
                    protocol = %ctx.protocol,
                    upstream_status = %status,
                    user_agent = %ctx.user_agent,
                    error = %e,
                    "Couldn't read response body"
                );
                ProxyError::BodyRead(e)
            })?;
        if gzip {
            relay_headers.remove(header::CONTENT_ENCODING);
        }
        advance(&mut state, PipelineState::BodyRead);

        let Some(credential) = credential else {
            advance(&mut state, PipelineState::PassThrough);
            return Ok(ProxyResult {
                status,
                headers: relay_headers,
                body: Some(plaintext),
                encrypted: false,
            });
        };

        let key = cipher::derive_key(&credential, &self.shared_key_salt);
        let encrypted = cipher::encrypt(&key, &plaintext).map_err(|e| {
            tracing::error!(
                caller = %ctx.caller,
                method = %ctx.method,
                target = %destination,
                protocol = %ctx.protocol,
                upstream_status = %status,
                user_agent = %ctx.user_agent,
                error = %e,
                "Couldn't encrypt response"
            );
            ProxyError::from(e)
        })?;
        advance(&mut state, PipelineState::Encrypted);
        metrics::record_encrypted();

        Ok(ProxyResult {
            status,
            headers: relay_headers,
            body: Some(encrypted.into()),
            encrypted: true,
        })
    }
}

pub(crate) fn advance(state: &mut PipelineState, next: PipelineState) {
    tracing::trace!(from = ?*state, to = ?next, "Pipeline transition");
    *state = next;
}

/// Inbound headers minus hop-by-hop, `Host` and `Content-Length`; the client
/// derives the last two from the destination and the truncated body.
fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut outbound = HeaderMap::with_capacity(inbound.len());
    headers::transfer(&mut outbound, inbound);
    headers::strip_hop_by_hop(&mut outbound);
    outbound.remove(header::HOST);
    outbound.remove(header::CONTENT_LENGTH);
    outbound
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"))
}

fn upstream_failure(ctx: &LogContext, destination: &ResolvedDestination, err: UpstreamError) -> ProxyError {
    let status = err.status();
    tracing::error!(
        caller = %ctx.caller,
        method = %ctx.method,
        target = %destination,
        protocol = %ctx.protocol,
        upstream_status = ?status.map(|s| s.as_u16()),
        user_agent = %ctx.user_agent,
        error = %err,
        "Couldn't execute the request"
    );
    match status {
        Some(status) => ProxyError::UpstreamPartialFailure {
            status,
            reason: err.to_string(),
        },
        None => ProxyError::UpstreamUnreachable(err.to_string()),
    }
}
