use chrono::Utc;
use std::sync::Arc;

use super::{fetch_and_store, RevalidateMode, StrategyContext};
use crate::upstream::Network;
use crate::worker::freshness::{self, Envelope, Freshness};
use crate::worker::registry::CacheGeneration;
use crate::worker::types::{FetchRequest, FetchResponse};

/// Stale-while-revalidate with a TTL, over the dynamic generation.
///
/// Fresh entries are served without waiting on the network. Stale entries are
/// refetched, and served anyway when the refetch fails. With nothing usable in
/// the cache and no network the caller gets a synthetic 503 JSON error.
pub async fn handle(
    ctx: &StrategyContext<'_>,
    request: &FetchRequest,
    envelope: Envelope,
) -> FetchResponse {
    let generation = ctx.registry.open(&ctx.names.dynamic).await;

    if let Some(cached) = generation.match_request(&request.key()).await {
        match freshness::assess(&cached, envelope, ctx.settings.default_ttl_secs, Utc::now()) {
            Ok(Freshness::Fresh) => {
                tracing::debug!("Fresh cache hit: {}", request.url);
                if ctx.settings.revalidate_mode == RevalidateMode::Background {
                    spawn_refresh(generation, Arc::clone(ctx.network), request.clone());
                }
                return cached;
            }
            Ok(Freshness::Stale) => {
                tracing::debug!("Cache entry expired, refetching: {}", request.url);
                return match fetch_and_store(&generation, ctx.network.as_ref(), request).await {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::info!(
                            "Refetch of {} failed, serving stale copy: {}",
                            request.url,
                            e
                        );
                        cached
                    }
                };
            }
            Err(e) => {
                tracing::warn!(
                    "Unreadable cached body for {}, treating as miss: {}",
                    request.url,
                    e
                );
            }
        }
    }

    match fetch_and_store(&generation, ctx.network.as_ref(), request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Fetch of {} failed with nothing cached: {}", request.url, e);
            FetchResponse::offline_json()
        }
    }
}

// Not awaited by the responding request; failures are only logged.
fn spawn_refresh(generation: CacheGeneration, network: Arc<dyn Network>, request: FetchRequest) {
    tokio::spawn(async move {
        if let Err(e) = fetch_and_store(&generation, network.as_ref(), &request).await {
            tracing::warn!("Background refresh of {} failed: {}", request.url, e);
        }
    });
}
