use reqwest::StatusCode;

use super::StrategyContext;
use crate::worker::types::{FetchRequest, FetchResponse, RequestKey};

const LAST_RESORT_PAGE: &str = "<!doctype html><title>Offline</title><p>You are offline.</p>";

/// HTML navigations: the network when reachable, otherwise any cached copy of
/// the page, otherwise the offline page. Never fails.
pub async fn handle(ctx: &StrategyContext<'_>, request: &FetchRequest) -> FetchResponse {
    match ctx.network.fetch(request).await {
        Ok(response) => {
            if ctx.settings.cache_navigations && response.is_success() {
                let generation = ctx.registry.open(&ctx.names.static_assets).await;
                generation
                    .put(request.key(), response.clone().stamped(chrono::Utc::now()))
                    .await;
            }
            response
        }
        Err(e) => {
            tracing::info!("Navigation to {} failed, serving from cache: {}", request.url, e);
            offline_fallback(ctx, request).await
        }
    }
}

async fn offline_fallback(ctx: &StrategyContext<'_>, request: &FetchRequest) -> FetchResponse {
    let preferred = &ctx.names.static_assets;
    if let Some(cached) = ctx.registry.match_any(&request.key(), preferred).await {
        return cached;
    }

    let offline_key = RequestKey::get(&ctx.settings.offline_url);
    if let Some(page) = ctx.registry.match_any(&offline_key, preferred).await {
        return page;
    }

    tracing::warn!("Offline page {} is not cached", ctx.settings.offline_url);
    FetchResponse::html(StatusCode::SERVICE_UNAVAILABLE, LAST_RESORT_PAGE)
}
