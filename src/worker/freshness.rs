//! TTL freshness of cached API payloads.
//!
//! Weather payloads carry their own freshness: a `fetched_at` (or older
//! `updated_at`) timestamp plus `ttl_seconds`. Entries from icon hosts have no
//! such envelope and age from the moment they were stored.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::types::FetchResponse;

/// Where the freshness of a cached entry is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope {
    /// JSON body with a timestamp field and `ttl_seconds`.
    Json,
    /// The time the entry was written, plus the default TTL.
    StoredAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Decides whether a cached entry may be served without touching the network.
///
/// Returns an error only when a JSON envelope is expected and the body does not
/// parse; callers treat that entry as absent. A missing or unreadable timestamp
/// makes the entry stale.
pub fn assess(
    cached: &FetchResponse,
    envelope: Envelope,
    default_ttl_secs: u64,
    now: DateTime<Utc>,
) -> Result<Freshness, serde_json::Error> {
    let (fetched_at_ms, ttl_secs) = match envelope {
        Envelope::Json => {
            let body: Value = serde_json::from_slice(&cached.body)?;
            (fetched_at_millis(&body), ttl_seconds(&body).unwrap_or(default_ttl_secs))
        }
        Envelope::StoredAt => (
            cached.stored_at.map(|at| at.timestamp_millis()),
            default_ttl_secs,
        ),
    };

    Ok(match fetched_at_ms {
        Some(fetched_at) if is_fresh(fetched_at, ttl_secs, now.timestamp_millis()) => {
            Freshness::Fresh
        }
        _ => Freshness::Stale,
    })
}

/// `now < fetched_at + ttl * 1000`, all in milliseconds.
pub fn is_fresh(fetched_at_ms: i64, ttl_secs: u64, now_ms: i64) -> bool {
    let ttl_ms = i64::try_from(ttl_secs).unwrap_or(i64::MAX).saturating_mul(1000);
    now_ms < fetched_at_ms.saturating_add(ttl_ms)
}

fn fetched_at_millis(body: &Value) -> Option<i64> {
    let field = body.get("fetched_at").or_else(|| body.get("updated_at"))?;
    match field {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|at| at.timestamp_millis()),
        // Epoch milliseconds
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

// Zero counts as absent.
fn ttl_seconds(body: &Value) -> Option<u64> {
    body.get("ttl_seconds")
        .and_then(Value::as_u64)
        .filter(|ttl| *ttl > 0)
}
