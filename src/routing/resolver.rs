//! Destination URL resolution.
//!
//! Clients embed the destination in the request path in one of three forms:
//!
//! ```text
//! /aHR0cHM6Ly9leGFtcGxlLmNvbQ          base64, standard alphabet, no padding
//! /https%3A%2F%2Fexample.com           percent-encoded literal
//! /https://example.com                 bare literal
//! ```
//!
//! Forms are tried in that order and the first one that yields an absolute
//! URL with both a scheme and a host wins. Base64 goes first: its alphabet is
//! fixed and strict decoding fails fast on anything else.
//!
//! `url::Url` validates the candidate, but the host string handed to the
//! access policy is the authority exactly as the caller wrote it: original
//! case, explicit default port kept, userinfo removed.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use percent_encoding::percent_decode_str;
use thiserror::Error;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("request target {0:?} does not decode to an absolute URL")]
    MalformedTarget(String),
}

/// Which encoding the destination arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetEncoding {
    Base64,
    PercentEncoded,
    Literal,
}

/// A validated absolute destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDestination {
    url: Url,
    authority: String,
    encoding: TargetEncoding,
}

impl ResolvedDestination {
    fn from_candidate(candidate: &str, url: Url, encoding: TargetEncoding) -> Option<Self> {
        if url.scheme().is_empty() {
            return None;
        }
        let normalized = authority(&url)?;
        let authority = literal_authority(candidate)
            .map(str::to_string)
            .unwrap_or(normalized);
        Some(Self {
            url,
            authority,
            encoding,
        })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Host including the port when one was given explicitly, as written.
    pub fn host(&self) -> &str {
        &self.authority
    }

    /// Normalized spellings of the same authority.
    pub fn aliases(&self) -> Vec<String> {
        authority_aliases(&self.url)
    }

    /// Path and query to request against the host.
    pub fn path_and_query(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn encoding(&self) -> TargetEncoding {
        self.encoding
    }
}

impl std::fmt::Display for ResolvedDestination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// `host[:port]` of an absolute URL, the string host policies match against.
pub fn authority(url: &Url) -> Option<String> {
    let host = url.host_str().filter(|h| !h.is_empty())?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// `host` and `host:port` of a parsed URL, the port falling back to the
/// scheme default.
pub fn authority_aliases(url: &Url) -> Vec<String> {
    let Some(host) = url.host_str().filter(|h| !h.is_empty()) else {
        return Vec::new();
    };
    let mut aliases = vec![host.to_string()];
    if let Some(port) = url.port_or_known_default() {
        aliases.push(format!("{host}:{port}"));
    }
    aliases
}

/// The authority component of `candidate` as written, without userinfo.
fn literal_authority(candidate: &str) -> Option<&str> {
    let (_, rest) = candidate.trim().split_once("://")?;
    let end = rest.find(['/', '\\', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..end];
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    (!authority.is_empty()).then_some(authority)
}

/// Decode the destination from a raw request target (path + query).
pub fn resolve(target: &str) -> Result<ResolvedDestination, ResolveError> {
    let raw = target.strip_prefix('/').unwrap_or(target);

    if let Some(dest) = STANDARD_NO_PAD
        .decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .and_then(|s| absolute(&s, TargetEncoding::Base64))
    {
        return Ok(dest);
    }

    if let Some(dest) = percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .and_then(|s| absolute(&s, TargetEncoding::PercentEncoded))
    {
        return Ok(dest);
    }

    absolute(raw, TargetEncoding::Literal)
        .ok_or_else(|| ResolveError::MalformedTarget(target.to_string()))
}

fn absolute(candidate: &str, encoding: TargetEncoding) -> Option<ResolvedDestination> {
    Url::parse(candidate)
        .ok()
        .and_then(|url| ResolvedDestination::from_candidate(candidate, url, encoding))
}

#[cfg(test)]
mod tests {
    use super::*;
    use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};

    const URLS: &[&str] = &[
        "https://example.com/",
        "https://api.allowed.test/v1",
        "http://localhost:8080/a/b?x=1&y=two",
        "https://production.api-lambda.example.io/graphql?op=q",
    ];

    #[test]
    fn resolves_all_three_encodings() {
        for &u in URLS {
            let b64 = format!("/{}", STANDARD_NO_PAD.encode(u));
            let pct = format!("/{}", utf8_percent_encode(u, NON_ALPHANUMERIC));
            let lit = format!("/{u}");

            let via_b64 = resolve(&b64).unwrap();
            let via_pct = resolve(&pct).unwrap();
            let via_lit = resolve(&lit).unwrap();

            assert_eq!(via_b64.url().as_str(), u);
            assert_eq!(via_pct.url().as_str(), u);
            assert_eq!(via_lit.url().as_str(), u);
            assert_eq!(via_b64.encoding(), TargetEncoding::Base64);
            assert_eq!(via_pct.encoding(), TargetEncoding::PercentEncoded);
        }
    }

    #[test]
    fn documented_examples() {
        for target in [
            "/aHR0cHM6Ly9leGFtcGxlLmNvbQ",
            "/https%3A%2F%2Fexample.com",
            "/https://example.com",
        ] {
            let dest = resolve(target).unwrap();
            assert_eq!(dest.scheme(), "https");
            assert_eq!(dest.host(), "example.com");
            assert_eq!(dest.path_and_query(), "/");
        }
    }

    #[test]
    fn padded_base64_is_not_accepted() {
        assert!(resolve("/aHR0cHM6Ly9leGFtcGxlLmNvbQ==").is_err());
    }

    #[test]
    fn splits_host_port_and_request_uri() {
        let dest = resolve("/https%3A%2F%2Fapi.allowed.test%3A8443%2Fv1%3Fa%3Db").unwrap();
        assert_eq!(dest.host(), "api.allowed.test:8443");
        assert_eq!(dest.path_and_query(), "/v1?a=b");
    }

    #[test]
    fn rejects_targets_without_host() {
        for target in ["/", "", "/just/a/path", "/mailto:someone", "/%2Fetc%2Fpasswd", "/https://"] {
            assert!(
                matches!(resolve(target), Err(ResolveError::MalformedTarget(_))),
                "{target}"
            );
        }
    }

    #[test]
    fn keeps_authority_as_written() {
        let dest = resolve("/https://evil.test:443/").unwrap();
        assert_eq!(dest.host(), "evil.test:443");
        assert_eq!(dest.aliases(), ["evil.test", "evil.test:443"]);

        let dest = resolve("/https%3A%2F%2FAPI.Example.com%2F").unwrap();
        assert_eq!(dest.host(), "API.Example.com");
        assert_eq!(dest.url().host_str(), Some("api.example.com"));
    }

    #[test]
    fn authority_ignores_userinfo_and_backslash_paths() {
        let dest = resolve("/https://user:pw@api.allowed.test/x").unwrap();
        assert_eq!(dest.host(), "api.allowed.test");

        let dest = resolve("/https://evil.test\\@good.test/").unwrap();
        assert_eq!(dest.url().host_str(), Some("evil.test"));
        assert_eq!(dest.host(), "evil.test");
    }

    #[test]
    fn strips_a_single_leading_slash() {
        assert!(resolve("https://example.com").is_ok());
        assert!(resolve("//https://example.com").is_err());
    }
}
