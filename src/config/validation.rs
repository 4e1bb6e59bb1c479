//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Host patterns must compile as globs
//! - Methods and header names must be valid HTTP tokens
//! - Value ranges (size ceilings > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::{HeaderName, HeaderValue, Method};
use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::security::access_control::compile_pattern;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid host pattern {pattern:?} in {list}: {reason}")]
    HostPattern {
        list: &'static str,
        pattern: String,
        reason: String,
    },

    #[error("invalid HTTP method {0:?}")]
    Method(String),

    #[error("invalid header name {0:?}")]
    HeaderName(String),

    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("invalid socket address {value:?} for {field}")]
    Address { field: &'static str, value: String },

    #[error("invalid CORS origin {0:?}")]
    CorsOrigin(String),
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let general = &config.general;

    for (list, patterns) in [
        ("allowedHosts", &general.allowed_hosts),
        ("disallowedHosts", &general.disallowed_hosts),
    ] {
        for pattern in patterns {
            if let Err(e) = compile_pattern(pattern) {
                errors.push(ValidationError::HostPattern {
                    list,
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    for method in &general.allowed_methods {
        if Method::from_bytes(method.as_bytes()).is_err() {
            errors.push(ValidationError::Method(method.clone()));
        }
    }

    if HeaderName::from_bytes(general.is_encrypted_header_key.as_bytes()).is_err() {
        errors.push(ValidationError::HeaderName(
            general.is_encrypted_header_key.clone(),
        ));
    }

    if general.listen.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field: "listen",
            value: general.listen.clone(),
        });
    }

    if config.limits.max_request_size_in_kb == 0 {
        errors.push(ValidationError::ZeroLimit("maxRequestSizeInKb"));
    }
    if config.limits.max_response_size_in_kb == 0 {
        errors.push(ValidationError::ZeroLimit("maxResponseSizeInKb"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::Address {
            field: "metricsAddress",
            value: config.observability.metrics_address.clone(),
        });
    }

    if let Some(cors) = &config.cors {
        for origin in &cors.allowed_origins {
            if origin != "*" && HeaderValue::from_str(origin).is_err() {
                errors.push(ValidationError::CorsOrigin(origin.clone()));
            }
        }
        for method in &cors.allowed_methods {
            if Method::from_bytes(method.as_bytes()).is_err() {
                errors.push(ValidationError::Method(method.clone()));
            }
        }
        for name in cors.allowed_headers.iter().chain(&cors.exposed_headers) {
            if name != "*" && HeaderName::from_bytes(name.as_bytes()).is_err() {
                errors.push(ValidationError::HeaderName(name.clone()));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
