use super::{fetch_and_store, StrategyContext};
use crate::upstream::FetchError;
use crate::worker::types::{FetchRequest, FetchResponse};

/// Static assets: the static generation answers when it can, the network
/// fills misses. A network failure on a miss is returned to the caller.
pub async fn handle(
    ctx: &StrategyContext<'_>,
    request: &FetchRequest,
) -> Result<FetchResponse, FetchError> {
    let generation = ctx.registry.open(&ctx.names.static_assets).await;

    if let Some(cached) = generation.match_request(&request.key()).await {
        tracing::debug!("Static cache hit: {}", request.url);
        return Ok(cached);
    }

    fetch_and_store(&generation, ctx.network.as_ref(), request).await
}
