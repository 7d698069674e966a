use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod routes;
mod upstream;
mod utils;
mod worker;

use config::Config;
use routes::{create_router, AppState};
use upstream::UpstreamClient;
use worker::{registry::CacheRegistry, WorkerHost};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offline_cache_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Network and cache storage outlive any single worker version
    let network = Arc::new(UpstreamClient::new(&config)?);
    let registry = Arc::new(CacheRegistry::new(config.cache_max_entries));
    let host = Arc::new(WorkerHost::new(registry, network));

    // Install and activate the current version
    let worker = host.build_worker(&config)?;
    match host.register(worker).await {
        Ok(worker) => tracing::info!(
            "Worker {} controlling requests for {}",
            worker.version(),
            config.upstream_origin
        ),
        Err(e) => tracing::error!(
            "Worker {} did not install, passing requests through: {}",
            config.sw_version,
            e
        ),
    }

    let bind_addr = config.bind_addr.clone();
    let state = AppState {
        config: Arc::new(config),
        host,
    };

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server starting on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
