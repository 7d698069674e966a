//! Caching policies executed against the cache registry.

pub mod cache_first;
pub mod network_first;
pub mod revalidate;

use chrono::Utc;
use reqwest::Url;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::registry::{CacheGeneration, CacheRegistry, GenerationNames};
use super::types::{FetchRequest, FetchResponse};
use crate::upstream::{FetchError, Network};

/// What a fresh hit on a revalidated route does besides answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RevalidateMode {
    /// Serve the cached copy and leave the network alone.
    OnStale,
    /// Serve the cached copy and refresh it in the background.
    Background,
}

impl RevalidateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevalidateMode::OnStale => "on-stale",
            RevalidateMode::Background => "background",
        }
    }
}

impl fmt::Display for RevalidateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevalidateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on-stale" | "onstale" => Ok(RevalidateMode::OnStale),
            "background" => Ok(RevalidateMode::Background),
            other => Err(format!("unknown revalidate mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StrategySettings {
    pub offline_url: Url,
    pub default_ttl_secs: u64,
    pub revalidate_mode: RevalidateMode,
    pub cache_navigations: bool,
}

/// Everything a strategy needs from the worker that runs it.
pub struct StrategyContext<'a> {
    pub registry: &'a CacheRegistry,
    pub network: &'a Arc<dyn Network>,
    pub names: &'a GenerationNames,
    pub settings: &'a StrategySettings,
}

/// Fetches from the network and stores successful responses in `generation`.
///
/// The stored copy is written before the live response is handed back.
pub(crate) async fn fetch_and_store(
    generation: &CacheGeneration,
    network: &dyn Network,
    request: &FetchRequest,
) -> Result<FetchResponse, FetchError> {
    let response = network.fetch(request).await?;

    if response.is_success() {
        generation
            .put(request.key(), response.clone().stamped(Utc::now()))
            .await;
    } else {
        tracing::debug!(
            "Not caching {} {}: status {}",
            request.method,
            request.url,
            response.status
        );
    }

    Ok(response)
}
