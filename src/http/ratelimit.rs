//! Route serialization and rate-limit bookkeeping.
//!
//! Requests are serialized per route key: the literal method and path of
//! the call. Two paths the server would place in the same bucket are not
//! coalesced; bucket ids from response headers are not consulted.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Method;
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const RETRY_AFTER_HEADER: &str = "retry-after";
const GLOBAL_HEADER: &str = "x-ratelimit-global";

/// Identifier selecting the mutual-exclusion guard for a request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteKey(String);

impl RouteKey {
    pub fn new(method: &Method, route: &str) -> Self {
        Self(format!("{method} {route}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lazily-populated table of per-route locks.
///
/// Entries are never removed. The table itself sits behind a short-lived
/// mutex so two callers touching an unseen key at once get the same lock.
#[derive(Debug, Default)]
pub struct RouteLocks {
    locks: Mutex<HashMap<RouteKey, Arc<AsyncMutex<()>>>>,
}

impl RouteLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_handle(&self, key: &RouteKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Waits until no other request holds `key`, then holds it until the
    /// returned guard is dropped.
    pub async fn acquire(&self, key: &RouteKey) -> OwnedMutexGuard<()> {
        self.lock_handle(key).lock_owned().await
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Client-wide pause applied when the server reports a global limit.
#[derive(Debug, Default)]
pub struct GlobalCooldown {
    gate: AsyncMutex<()>,
}

impl GlobalCooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns once no global cooldown is in progress.
    pub async fn wait_clear(&self) {
        drop(self.gate.lock().await);
    }

    /// Blocks every route for `duration`.
    pub async fn hold_for(&self, duration: Duration) {
        let _gate = self.gate.lock().await;
        tokio::time::sleep(duration).await;
    }

    pub fn is_active(&self) -> bool {
        self.gate.try_lock().is_err()
    }
}

/// Rate-limit details of a `429` response.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RateLimitInfo {
    pub retry_after: Duration,
    pub global: bool,
}

impl RateLimitInfo {
    /// Reads `retry-after` (seconds, fractional allowed) and the global flag
    /// from headers, falling back to the JSON body fields of the same meaning.
    pub fn from_response(headers: &HeaderMap, body: &Value, default_retry_after: Duration) -> Self {
        let header_retry = headers
            .get(RETRY_AFTER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<f64>().ok());
        let body_retry = body.get("retry_after").and_then(Value::as_f64);
        let retry_after = header_retry
            .or(body_retry)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(default_retry_after);

        let header_global = headers
            .get(GLOBAL_HEADER)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| !value.trim().eq_ignore_ascii_case("false"));
        let body_global = body.get("global").and_then(Value::as_bool).unwrap_or(false);

        Self {
            retry_after,
            global: header_global || body_global,
        }
    }
}
