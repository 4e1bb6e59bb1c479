//! CORS layer construction.
//!
//! A `[cors]` section builds an explicit policy. Without one, `unsafeCORS`
//! enables a permissive layer; otherwise no CORS stage is installed.

use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, Any, CorsLayer, ExposeHeaders};

use crate::config::{CorsConfig, ProxyConfig};

pub fn layer(config: &ProxyConfig) -> Option<CorsLayer> {
    match &config.cors {
        Some(cors) => Some(from_section(cors)),
        None if config.general.unsafe_cors => {
            tracing::warn!("unsafeCORS enabled: every origin is allowed");
            Some(CorsLayer::permissive())
        }
        None => None,
    }
}

fn from_section(cors: &CorsConfig) -> CorsLayer {
    let wildcard = |list: &[String]| list.iter().any(|v| v == "*");

    let origins = if wildcard(&cors.allowed_origins) {
        AllowOrigin::from(Any)
    } else {
        AllowOrigin::list(
            cors.allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };
    let methods = if wildcard(&cors.allowed_methods) {
        AllowMethods::from(Any)
    } else {
        AllowMethods::list(
            cors.allowed_methods
                .iter()
                .filter_map(|m| Method::from_bytes(m.as_bytes()).ok()),
        )
    };
    let headers = if wildcard(&cors.allowed_headers) {
        AllowHeaders::from(Any)
    } else {
        AllowHeaders::list(header_names(&cors.allowed_headers))
    };
    let exposed = if wildcard(&cors.exposed_headers) {
        ExposeHeaders::from(Any)
    } else {
        ExposeHeaders::list(header_names(&cors.exposed_headers))
    };

    let mut layer = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers(exposed);
    if cors.max_age > 0 {
        layer = layer.max_age(Duration::from_secs(cors.max_age));
    }

    // Credentials cannot be combined with a wildcard in any list.
    let any_wildcard = wildcard(&cors.allowed_origins)
        || wildcard(&cors.allowed_methods)
        || wildcard(&cors.allowed_headers)
        || wildcard(&cors.exposed_headers);
    if cors.allow_credentials && any_wildcard {
        tracing::warn!("CORS allowCredentials ignored: a list contains \"*\"");
    } else if cors.allow_credentials {
        layer = layer.allow_credentials(true);
    }
    layer
}

fn header_names(names: &[String]) -> Vec<HeaderName> {
    names
        .iter()
        .filter_map(|n| HeaderName::from_bytes(n.as_bytes()).ok())
        .collect()
}
