//! Outbound HTTP client.
//!
//! # Responsibilities
//! - One shared connection pool for every inbound request
//! - Per-phase timeouts: connect (dial + TLS), response headers, idle
//! - Cap concurrent exchanges per destination authority
//! - Follow redirects only towards hosts the access policy allows
//!
//! # Design Decisions
//! - No retries: a failed attempt is surfaced once
//! - Redirects are followed here, hop by hop, rather than inside reqwest, so
//!   every hop passes the policy and an exhausted chain still reports the
//!   last status it saw
//! - Body streaming has no time budget; the size ceiling bounds it
//! - Dropping the in-flight future abandons the upstream exchange, so a
//!   disconnecting caller cancels the outbound fetch

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap, Method, StatusCode};
use bytes::Bytes;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use crate::config::ProxyConfig;
use crate::routing::{authority, authority_aliases};
use crate::security::AccessPolicy;

/// Redirect hops followed before giving up.
pub const MAX_REDIRECTS: usize = 10;

/// Go-style default when no per-host idle limit is configured.
const DEFAULT_IDLE_PER_HOST: usize = 2;

/// Credentials that must not follow a redirect to another authority.
static SENSITIVE_HEADERS: [header::HeaderName; 3] = [
    header::AUTHORIZATION,
    header::COOKIE,
    header::WWW_AUTHENTICATE,
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("transport error: {source}")]
    Transport {
        /// Status of the response obtained before the failure, if any.
        status: Option<StatusCode>,
        #[source]
        source: reqwest::Error,
    },

    #[error("no response headers within {0:?}")]
    ResponseHeaderTimeout(Duration),

    #[error("response headers of {size} bytes exceed the {limit} byte limit")]
    ResponseHeaderTooLarge { size: usize, limit: usize },

    #[error("redirect limit reached, last status {status}")]
    TooManyRedirects { status: StatusCode },
}

impl UpstreamError {
    /// Status of a response obtained despite the failure.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UpstreamError::Transport { status, .. } => *status,
            UpstreamError::TooManyRedirects { status } => Some(*status),
            UpstreamError::ResponseHeaderTimeout(_) | UpstreamError::ResponseHeaderTooLarge { .. } => {
                None
            }
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(source: reqwest::Error) -> Self {
        UpstreamError::Transport {
            status: source.status(),
            source,
        }
    }
}

/// Upstream response plus the per-host slot it occupies until dropped.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub response: reqwest::Response,
    _slot: Option<HostSlot>,
}

/// A held per-host permit. The host's entry is evicted once nobody holds or
/// waits for it.
#[derive(Debug)]
struct HostSlot {
    permit: Option<OwnedSemaphorePermit>,
    host: String,
    slots: Arc<DashMap<String, Arc<Semaphore>>>,
}

impl Drop for HostSlot {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.slots
            .remove_if(&self.host, |_, semaphore| Arc::strong_count(semaphore) == 1);
    }
}

/// The request being sent, rewritten between redirect hops.
#[derive(Debug, Clone)]
struct Hop {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

/// The shared outbound client.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    policy: AccessPolicy,
    response_header_timeout: Option<Duration>,
    max_response_header_bytes: Option<usize>,
    max_conns_per_host: usize,
    slots: Arc<DashMap<String, Arc<Semaphore>>>,
}

impl UpstreamClient {
    /// Build the client from configuration.
    pub fn from_config(config: &ProxyConfig, policy: AccessPolicy) -> Result<Self, reqwest::Error> {
        let limits = &config.limits;
        let timeouts = &config.timeouts;

        let mut builder = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .pool_max_idle_per_host(idle_per_host(limits.max_idle_conns, limits.max_idle_conns_per_host))
            .pool_idle_timeout(timeouts.idle_conn())
            .tcp_keepalive(Duration::from_secs(30));
        if let Some(connect) = timeouts.connect() {
            builder = builder.connect_timeout(connect);
        }

        Ok(Self {
            client: builder.build()?,
            policy,
            response_header_timeout: timeouts.response_header(),
            max_response_header_bytes: limits.max_response_header_bytes(),
            max_conns_per_host: limits.max_conns_per_host,
            slots: Arc::new(DashMap::new()),
        })
    }

    /// Send one request and wait for the response headers, following
    /// allowed redirects.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let mut hop = Hop {
            method,
            url,
            headers,
            body,
        };
        let mut redirects = 0;

        loop {
            let slot = match authority(&hop.url) {
                Some(host) => self.acquire_slot(&host).await,
                None => None,
            };
            let response = self.send_once(&hop).await?;

            let Some(next) = self.redirect_target(&hop, &response) else {
                return Ok(UpstreamResponse {
                    response,
                    _slot: slot,
                });
            };
            if redirects == MAX_REDIRECTS {
                return Err(UpstreamError::TooManyRedirects {
                    status: response.status(),
                });
            }
            redirects += 1;
            tracing::debug!(
                status = %response.status(),
                from = %hop.url,
                to = %next,
                hop = redirects,
                "Following redirect"
            );
            hop = redirected(hop, response.status(), next);
        }
    }

    async fn send_once(&self, hop: &Hop) -> Result<reqwest::Response, UpstreamError> {
        let mut request = self
            .client
            .request(hop.method.clone(), hop.url.clone())
            .headers(hop.headers.clone());
        if !hop.body.is_empty() {
            request = request.body(hop.body.clone());
        }

        let response = match self.response_header_timeout {
            Some(limit) => tokio::time::timeout(limit, request.send())
                .await
                .map_err(|_| UpstreamError::ResponseHeaderTimeout(limit))??,
            None => request.send().await?,
        };

        if let Some(limit) = self.max_response_header_bytes {
            let size = header_size(response.headers());
            if size > limit {
                return Err(UpstreamError::ResponseHeaderTooLarge { size, limit });
            }
        }
        Ok(response)
    }

    /// Where a redirect response points, if it should be followed.
    fn redirect_target(&self, hop: &Hop, response: &reqwest::Response) -> Option<Url> {
        if !is_followed_redirect(response.status()) {
            return None;
        }
        let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
        let next = hop.url.join(location).ok()?;

        let allowed = authority(&next)
            .map(|host| {
                self.policy
                    .check_with_aliases(&host, &authority_aliases(&next))
                    .is_allowed()
            })
            .unwrap_or(false);
        if !allowed {
            tracing::warn!(location = %next, "Not following redirect to a denied host");
            return None;
        }
        Some(next)
    }

    async fn acquire_slot(&self, host: &str) -> Option<HostSlot> {
        if self.max_conns_per_host == 0 {
            return None;
        }
        let semaphore = self
            .slots
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_conns_per_host)))
            .clone();
        let permit = semaphore.acquire_owned().await.ok()?;
        Some(HostSlot {
            permit: Some(permit),
            host: host.to_string(),
            slots: self.slots.clone(),
        })
    }

    /// Free slots for `host`, if a per-host cap is configured.
    pub fn available_slots(&self, host: &str) -> Option<usize> {
        if self.max_conns_per_host == 0 {
            return None;
        }
        Some(
            self.slots
                .get(host)
                .map(|s| s.available_permits())
                .unwrap_or(self.max_conns_per_host),
        )
    }

    /// Authorities currently holding or awaiting a slot.
    pub fn tracked_hosts(&self) -> usize {
        self.slots.len()
    }
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// The next hop: 303, and 301/302 after a POST, turn into a bodiless GET;
/// credentials are dropped when the authority changes.
fn redirected(mut hop: Hop, status: StatusCode, next: Url) -> Hop {
    let to_get = (status == StatusCode::SEE_OTHER && hop.method != Method::HEAD)
        || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
            && hop.method == Method::POST);
    if to_get {
        hop.method = Method::GET;
        hop.body = Bytes::new();
        hop.headers.remove(header::CONTENT_TYPE);
        hop.headers.remove(header::CONTENT_ENCODING);
    }
    if authority(&hop.url) != authority(&next) {
        for name in SENSITIVE_HEADERS.iter() {
            hop.headers.remove(name);
        }
    }
    hop.url = next;
    hop
}

/// Bytes the header block occupies on the wire.
fn header_size(headers: &HeaderMap) -> usize {
    headers
        .iter()
        .map(|(name, value)| name.as_str().len() + value.len() + 4)
        .sum()
}

fn idle_per_host(max_idle: usize, max_idle_per_host: usize) -> usize {
    let per_host = if max_idle_per_host == 0 {
        DEFAULT_IDLE_PER_HOST
    } else {
        max_idle_per_host
    };
    if max_idle == 0 {
        per_host
    } else {
        per_host.min(max_idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(configure: impl FnOnce(&mut ProxyConfig)) -> UpstreamClient {
        let mut config = ProxyConfig::default();
        configure(&mut config);
        let policy = AccessPolicy::new(&["*"], &[]).unwrap();
        UpstreamClient::from_config(&config, policy).unwrap()
    }

    fn hop(method: Method, url: &str) -> Hop {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        Hop {
            method,
            url: Url::parse(url).unwrap(),
            headers,
            body: Bytes::from_static(b"form"),
        }
    }

    #[test]
    fn idle_limits_follow_pool_semantics() {
        assert_eq!(idle_per_host(0, 0), 2);
        assert_eq!(idle_per_host(100, 10), 10);
        assert_eq!(idle_per_host(4, 10), 4);
        assert_eq!(idle_per_host(0, 16), 16);
    }

    #[tokio::test]
    async fn per_host_slots_are_bounded() {
        let client = client(|c| c.limits.max_conns_per_host = 2);

        assert_eq!(client.available_slots("a.test"), Some(2));
        let first = client.acquire_slot("a.test").await;
        let second = client.acquire_slot("a.test").await;
        assert!(first.is_some() && second.is_some());
        assert_eq!(client.available_slots("a.test"), Some(0));
        assert_eq!(client.available_slots("b.test"), Some(2));

        drop(first);
        assert_eq!(client.available_slots("a.test"), Some(1));
    }

    #[tokio::test]
    async fn idle_hosts_are_evicted() {
        let client = client(|c| c.limits.max_conns_per_host = 1);

        let mut held = Vec::new();
        for i in 0..50 {
            held.push(client.acquire_slot(&format!("h{i}.test:80")).await);
        }
        assert_eq!(client.tracked_hosts(), 50);

        drop(held);
        assert_eq!(client.tracked_hosts(), 0);
        assert_eq!(client.available_slots("h0.test:80"), Some(1));
    }

    #[tokio::test]
    async fn busy_host_survives_partial_release() {
        let client = client(|c| c.limits.max_conns_per_host = 2);
        let first = client.acquire_slot("a.test").await;
        let second = client.acquire_slot("a.test").await;

        drop(first);
        assert_eq!(client.tracked_hosts(), 1);
        drop(second);
        assert_eq!(client.tracked_hosts(), 0);
    }

    #[tokio::test]
    async fn unlimited_when_cap_is_zero() {
        let client = client(|_| {});
        assert!(client.acquire_slot("a.test").await.is_none());
        assert_eq!(client.available_slots("a.test"), None);
    }

    #[test]
    fn see_other_becomes_bodiless_get() {
        let next = Url::parse("http://a.test/done").unwrap();
        let hop = redirected(hop(Method::POST, "http://a.test/form"), StatusCode::SEE_OTHER, next);
        assert_eq!(hop.method, Method::GET);
        assert!(hop.body.is_empty());
        assert!(hop.headers.get(header::CONTENT_TYPE).is_none());
        assert_eq!(hop.headers[header::AUTHORIZATION], "Bearer abc");
    }

    #[test]
    fn temporary_redirect_keeps_method_and_body() {
        let next = Url::parse("http://a.test/other").unwrap();
        let hop = redirected(hop(Method::POST, "http://a.test/form"), StatusCode::TEMPORARY_REDIRECT, next);
        assert_eq!(hop.method, Method::POST);
        assert_eq!(hop.body, "form");
    }

    #[test]
    fn credentials_stay_with_their_authority() {
        let next = Url::parse("http://b.test/").unwrap();
        let hop = redirected(hop(Method::GET, "http://a.test/"), StatusCode::FOUND, next);
        assert!(hop.headers.get(header::AUTHORIZATION).is_none());
        assert_eq!(hop.url.as_str(), "http://b.test/");
    }

    #[test]
    fn header_size_counts_wire_bytes() {
        let mut headers = HeaderMap::new();
        headers.insert(header::SERVER, "mock".parse().unwrap());
        assert_eq!(header_size(&headers), "server".len() + "mock".len() + 4);
    }
}
