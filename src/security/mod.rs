//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Resolved destination:
//!     → access_control.rs (deny list, then allow list)
//! Outbound request / inbound response:
//!     → headers.rs (strip hop-by-hop, copy the rest)
//!     → limits.rs (ceiling-truncated body reads, gzip decode)
//! Final body:
//!     → cipher.rs (key derivation, AES-256-CBC)
//! ```
//!
//! # Design Decisions
//! - Fail closed: a host matching no allow pattern is denied
//! - Policy is checked before any network access
//! - Ceilings truncate rather than reject

pub mod access_control;
pub mod cipher;
pub mod headers;
pub mod limits;

pub use access_control::{AccessPolicy, Decision, PolicyError};
pub use cipher::{derive_key, encrypt, CipherError, DerivedKey};
