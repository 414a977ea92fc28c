//! Transport core for chat bot clients.
//!
//! The crate is organized by transport surface:
//! - `gateway`: auto-reconnecting realtime session with heartbeat supervision.
//! - `http`: REST client with per-route serialization and rate-limit retries.
//! - `client`: facade that logs in and supervises both.
//! - `retry`: shared backoff policy.
//! - `intents`: gateway intent flags.

/// Login, supervision and shutdown of both transports.
pub mod client;
/// Crate-level error taxonomy.
pub mod error;
/// Realtime gateway session, protocol types and event sink.
pub mod gateway;
/// Rate-limited REST client and endpoint helpers.
pub mod http;
/// Gateway intent bit set.
pub mod intents;
/// Retry and backoff policy.
pub mod retry;

pub use client::Client;
pub use error::{Error, Result};
pub use intents::Intents;
