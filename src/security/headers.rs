//! Header sanitization between the inbound and outbound legs.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers (both directions)
//! - Copy header sets preserving multi-value order
//!
//! # Design Decisions
//! - `HeaderMap` lookups are case-insensitive, so removal is too
//! - The hop-by-hop set is fixed (RFC 2616 §13.5.1)

use axum::http::{header, HeaderMap, HeaderName};

/// Headers meaningful only for a single transport connection.
pub static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    HeaderName::from_static("trailers"),
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove every hop-by-hop header. Idempotent.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
}

/// Append every name/value pair of `src` onto `dst`.
pub fn transfer(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name.clone(), value.clone());
    }
}
