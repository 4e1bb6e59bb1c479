//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stages)
//!     → request.rs (method, raw target, credential, caller)
//!     → pipeline.rs (method → resolve → policy → forward → read → encrypt)
//!         → client.rs (pooled outbound request)
//!     → response.rs (signal header, Content-Length, write-once status)
//!     → Send to client
//! ```

pub mod client;
pub mod middleware;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use pipeline::{PipelineError, ProxyPipeline};
pub use server::{AppState, HttpServer, ServerError};
