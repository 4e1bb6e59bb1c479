//! Destination host access control.
//!
//! # Responsibilities
//! - Compile allow/deny glob patterns once per configuration load
//! - Decide whether a destination `host[:port]` may be proxied to
//!
//! # Design Decisions
//! - Deny list is checked first and cannot be overridden by an allow match;
//!   it keeps the proxy's own hostnames from being used as destinations
//! - Allow-list-first: a host matching no allow pattern is denied
//! - `*` matches any run of characters, including `.` and `:`
//! - Matching is case-sensitive against the literal authority string
//! - The deny list is also checked against the normalized spellings of the
//!   same authority (lowercased host, explicit default port), so a deny
//!   entry cannot be dodged by rewriting the host

use std::sync::Arc;

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

/// Pattern compilation failure.
pub type PolicyError = globset::Error;

/// Outcome of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Matched a disallowed pattern.
    Denied,
    /// Matched no allowed pattern.
    NotAllowListed,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allowed
    }
}

/// Compiled allow/deny host lists.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    allowed: Arc<GlobSet>,
    disallowed: Arc<GlobSet>,
}

impl AccessPolicy {
    /// Compile both pattern lists.
    pub fn new<S: AsRef<str>>(allowed: &[S], disallowed: &[S]) -> Result<Self, PolicyError> {
        Ok(Self {
            allowed: Arc::new(compile_set(allowed)?),
            disallowed: Arc::new(compile_set(disallowed)?),
        })
    }

    /// Evaluate a destination host.
    pub fn check(&self, host: &str) -> Decision {
        if self.disallowed.is_match(host) {
            Decision::Denied
        } else if self.allowed.is_match(host) {
            Decision::Allowed
        } else {
            Decision::NotAllowListed
        }
    }

    /// Evaluate `host` as written, denying as well when any equivalent
    /// spelling in `aliases` matches the deny list.
    pub fn check_with_aliases<S: AsRef<str>>(&self, host: &str, aliases: &[S]) -> Decision {
        if aliases.iter().any(|a| self.disallowed.is_match(a.as_ref())) {
            return Decision::Denied;
        }
        self.check(host)
    }

    pub fn is_allowed(&self, host: &str) -> bool {
        self.check(host).is_allowed()
    }
}

/// Compile one host pattern.
pub fn compile_pattern(pattern: &str) -> Result<Glob, PolicyError> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .case_insensitive(false)
        .build()
}

fn compile_set<S: AsRef<str>>(patterns: &[S]) -> Result<GlobSet, PolicyError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(compile_pattern(pattern.as_ref())?);
    }
    builder.build()
}
