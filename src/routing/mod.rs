//! Destination routing subsystem.
//!
//! # Data Flow
//! ```text
//! Raw request target ("/<encoded destination>")
//!     → resolver.rs (base64 → percent-decoded → literal)
//!     → Return: ResolvedDestination or MalformedTarget
//! ```
//!
//! # Design Decisions
//! - Deterministic: same input always resolves to the same destination
//! - First successful decoding wins
//! - A destination without scheme or host is never returned

pub mod resolver;

pub use resolver::{
    authority, authority_aliases, resolve, ResolveError, ResolvedDestination, TargetEncoding,
};
