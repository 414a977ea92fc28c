//! REST transport modules.
//!
//! - `client`: request execution, response classification and retry.
//! - `ratelimit`: per-route locks, global cooldown and `429` parsing.
//! - `endpoints`: typed wrappers for common calls.

/// Rate-limited request client.
pub mod client;
/// Convenience endpoint wrappers.
pub mod endpoints;
/// Route locks and rate-limit bookkeeping.
pub mod ratelimit;

pub use client::{Attachment, HttpClient, HttpClientOptions, HttpDefaults, HttpError};
pub use endpoints::MessagePayload;
