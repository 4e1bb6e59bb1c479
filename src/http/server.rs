//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the shared pipeline and outbound client once per process
//! - Route every path and method to the proxy handler
//! - Wrap the handler in the configured middleware stages
//! - Serve until the shutdown broadcast fires, then drain

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header::InvalidHeaderName, HeaderName, Method, Request},
    response::Response,
    routing::any,
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::ProxyConfig;
use crate::http::middleware;
use crate::http::pipeline::{PipelineError, ProxyPipeline};
use crate::http::request::IncomingRequest;
use crate::http::response::{ResponseGuard, ResponseWriter};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("invalid encryption signal header name: {0}")]
    SignalHeader(#[from] InvalidHeaderName),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ProxyPipeline>,
    pub signal_header: HeaderName,
}

/// HTTP server for the forward proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let state = AppState {
            pipeline: Arc::new(ProxyPipeline::from_config(&config)?),
            signal_header: HeaderName::try_from(config.general.is_encrypted_header_key.as_str())?,
        };
        let router = Self::build_router(&config, state);
        Ok(Self { router, config })
    }

    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let router = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*target}", any(proxy_handler))
            .with_state(state);
        middleware::apply(router, middleware::stages(config))
    }

    /// The fully layered router, for serving on a custom transport.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            allowed_hosts = ?self.config.general.allowed_hosts,
            allowed_methods = ?self.config.general.allowed_methods,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Draining in-flight requests");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}

/// Run the pipeline and write its outcome exactly once.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let guard = request
        .extensions()
        .get::<Arc<ResponseGuard>>()
        .cloned()
        .unwrap_or_else(ResponseGuard::new);

    let head = request.method() == Method::HEAD;
    let outcome = state.pipeline.handle(IncomingRequest::new(request, peer)).await;
    ResponseWriter::new(guard, state.signal_header.clone())
        .for_head(head)
        .write(outcome)
}
