//! Response assembly.
//!
//! # Responsibilities
//! - Carry the pipeline outcome (`ProxyResult`) to the caller
//! - Set the encryption signal header and recompute `Content-Length`
//! - Guarantee at most one status write per request
//!
//! # Design Decisions
//! - The write state is a tri-state advanced by single atomic transitions:
//!   Unwritten → HeaderCommitted → BodyWritten
//! - The guard is shared with the access log stage, which reads the final
//!   status and size after the handler returns
//! - Error responses carry a status only, never internal error text
//! - Writing the response is the pipeline's final `Sent` transition

use std::sync::atomic::{AtomicU16, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::error::ProxyError;
use crate::http::pipeline::{advance, PipelineState};

/// Outcome of a successfully proxied request.
#[derive(Debug, Clone)]
pub struct ProxyResult {
    pub status: StatusCode,
    /// Upstream headers after hop-by-hop stripping.
    pub headers: HeaderMap,
    /// `None` when the body step was skipped (OPTIONS, HEAD).
    pub body: Option<Bytes>,
    pub encrypted: bool,
}

impl ProxyResult {
    /// State the pipeline ended in before the response is written.
    pub fn state(&self) -> PipelineState {
        match (&self.body, self.encrypted) {
            (None, _) => PipelineState::Forwarded,
            (Some(_), true) => PipelineState::Encrypted,
            (Some(_), false) => PipelineState::PassThrough,
        }
    }
}

/// Write progress of a single response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriteState {
    Unwritten = 0,
    HeaderCommitted = 1,
    BodyWritten = 2,
}

impl WriteState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WriteState::Unwritten,
            1 => WriteState::HeaderCommitted,
            _ => WriteState::BodyWritten,
        }
    }
}

/// Write-once status guard, also recording status and size for logging.
#[derive(Debug, Default)]
pub struct ResponseGuard {
    state: AtomicU8,
    status: AtomicU16,
    size: AtomicUsize,
}

impl ResponseGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Commit the status line. Returns false if one was already committed.
    pub fn commit_header(&self, status: StatusCode) -> bool {
        let committed = self
            .state
            .compare_exchange(
                WriteState::Unwritten as u8,
                WriteState::HeaderCommitted as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if committed {
            self.status.store(status.as_u16(), Ordering::Release);
        }
        committed
    }

    /// Record the body. An uncommitted header is committed as 200 first.
    pub fn commit_body(&self, len: usize) -> bool {
        self.commit_header(StatusCode::OK);
        let written = self
            .state
            .compare_exchange(
                WriteState::HeaderCommitted as u8,
                WriteState::BodyWritten as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if written {
            self.size.store(len, Ordering::Release);
        }
        written
    }

    pub fn state(&self) -> WriteState {
        WriteState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self.status.load(Ordering::Acquire) {
            0 => None,
            code => StatusCode::from_u16(code).ok(),
        }
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }
}

/// Turns a pipeline outcome into exactly one HTTP response.
pub struct ResponseWriter {
    guard: Arc<ResponseGuard>,
    signal_header: HeaderName,
    head: bool,
}

impl ResponseWriter {
    pub fn new(guard: Arc<ResponseGuard>, signal_header: HeaderName) -> Self {
        Self {
            guard,
            signal_header,
            head: false,
        }
    }

    /// Mark the response as answering a HEAD request.
    pub fn for_head(mut self, head: bool) -> Self {
        self.head = head;
        self
    }

    pub fn write(self, outcome: Result<ProxyResult, ProxyError>) -> Response {
        match outcome {
            Ok(result) => self.write_result(result),
            Err(err) => self.write_error(err),
        }
    }

    /// Write a pipeline result. A HEAD result keeps the upstream
    /// `Content-Length`, which describes the representation, not this body.
    pub fn write_result(self, result: ProxyResult) -> Response {
        let mut state = result.state();
        let status = self.commit(result.status);
        let mut headers = result.headers;

        let body = result.body.unwrap_or_default();
        if !self.head || !headers.contains_key(header::CONTENT_LENGTH) {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(body.len()));
        }
        headers.insert(self.signal_header.clone(), signal(result.encrypted));
        if !body.is_empty() {
            self.guard.commit_body(body.len());
        }
        advance(&mut state, PipelineState::Sent);

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        response
    }

    pub fn write_error(self, err: ProxyError) -> Response {
        tracing::debug!(kind = err.kind(), status = %err.status_code(), "Writing error response");
        let status = self.commit(err.status_code());
        let mut response = err.into_response();
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(self.signal_header.clone(), signal(false));
        response
    }

    fn commit(&self, status: StatusCode) -> StatusCode {
        if self.guard.commit_header(status) {
            status
        } else {
            tracing::warn!(
                status = %status,
                committed = ?self.guard.status(),
                "Response status already committed"
            );
            self.guard.status().unwrap_or(status)
        }
    }
}

fn signal(encrypted: bool) -> HeaderValue {
    HeaderValue::from_static(if encrypted { "true" } else { "false" })
}
