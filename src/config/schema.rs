//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//! Keys use the camelCase layout of the existing deployment files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Destination policy, encryption and listener settings.
    pub general: GeneralConfig,

    /// Body ceilings and connection-pool limits.
    pub limits: LimitsConfig,

    /// Per-phase timeouts, in seconds.
    pub timeouts: TimeoutConfig,

    /// Optional CORS negotiation.
    pub cors: Option<CorsConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// General settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeneralConfig {
    /// Salt appended to the caller's bearer token before key derivation.
    /// Only the proxy and its clients know it.
    pub shared_key_salt: String,

    /// Response header signalling whether the body is encrypted.
    pub is_encrypted_header_key: String,

    /// Glob patterns a destination host must match.
    pub allowed_hosts: Vec<String>,

    /// Glob patterns that are always denied, checked before `allowed_hosts`.
    pub disallowed_hosts: Vec<String>,

    /// Methods the proxy forwards.
    pub allowed_methods: Vec<String>,

    /// Allow every CORS request when no `[cors]` section is present.
    #[serde(rename = "unsafeCORS")]
    pub unsafe_cors: bool,

    /// Gzip pass-through responses for clients that accept it. Encrypted
    /// bodies are never compressed. Off by default: a compressed response
    /// is sent without `Content-Length`.
    pub compress_responses: bool,

    /// Bind address (e.g., "0.0.0.0:25259").
    pub listen: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            shared_key_salt: String::new(),
            is_encrypted_header_key: "X-Fndm-Is-Encrypted".to_string(),
            allowed_hosts: vec!["localhost".to_string(), "localhost:*".to_string()],
            disallowed_hosts: Vec::new(),
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            unsafe_cors: false,
            compress_responses: false,
            listen: "0.0.0.0:25259".to_string(),
        }
    }
}

/// Body ceilings and outbound connection-pool limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LimitsConfig {
    pub max_request_size_in_kb: u64,
    pub max_response_size_in_kb: u64,
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    /// Concurrent outbound exchanges per destination; 0 means unlimited.
    pub max_conns_per_host: usize,
    /// Upstream response header block ceiling; 0 leaves only the client's
    /// own framing limit.
    pub max_response_header_in_kb: u64,
}

impl LimitsConfig {
    /// Request body ceiling in bytes.
    pub fn max_request_bytes(&self) -> u64 {
        self.max_request_size_in_kb.saturating_mul(1024)
    }

    /// Response body ceiling in bytes.
    pub fn max_response_bytes(&self) -> u64 {
        self.max_response_size_in_kb.saturating_mul(1024)
    }

    /// Response header ceiling in bytes, if one is set.
    pub fn max_response_header_bytes(&self) -> Option<usize> {
        match self.max_response_header_in_kb {
            0 => None,
            kb => Some(usize::try_from(kb.saturating_mul(1024)).unwrap_or(usize::MAX)),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size_in_kb: 10 * 1024,
            max_response_size_in_kb: 10 * 1024,
            max_idle_conns: 100,
            max_idle_conns_per_host: 10,
            max_conns_per_host: 0,
            max_response_header_in_kb: 0,
        }
    }
}

/// Timeout configuration, in seconds. Zero disables a timeout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimeoutConfig {
    /// Whole-request deadline enforced by the server.
    pub client_timeout: u64,

    /// Time spent establishing a TCP connection.
    pub dialer_timeout: u64,

    /// Time spent in the TLS handshake.
    pub tls_handshake_timeout: u64,

    /// Time between sending the request and receiving response headers.
    pub response_header_timeout: u64,

    /// Wait for `100 Continue` before sending the body.
    pub expect_continue_timeout: u64,

    /// How long an idle connection stays in the pool.
    pub idle_conn_timeout: u64,
}

impl TimeoutConfig {
    pub fn client(&self) -> Option<Duration> {
        secs(self.client_timeout)
    }

    /// Connection establishment budget: dial plus TLS handshake.
    pub fn connect(&self) -> Option<Duration> {
        match (secs(self.dialer_timeout), secs(self.tls_handshake_timeout)) {
            (Some(dial), Some(tls)) => Some(dial + tls),
            (dial, tls) => dial.or(tls),
        }
    }

    pub fn response_header(&self) -> Option<Duration> {
        secs(self.response_header_timeout)
    }

    pub fn idle_conn(&self) -> Option<Duration> {
        secs(self.idle_conn_timeout)
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            client_timeout: 60,
            dialer_timeout: 5,
            tls_handshake_timeout: 5,
            response_header_timeout: 30,
            expect_continue_timeout: 1,
            idle_conn_timeout: 90,
        }
    }
}

/// CORS negotiation settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    pub exposed_headers: Vec<String>,
    /// Preflight cache lifetime in seconds.
    pub max_age: u64,
    pub allow_credentials: bool,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
