pub mod freshness;
pub mod lifecycle;
#[cfg(test)]
pub mod mock;
pub mod registry;
pub mod router;
pub mod strategy;
pub mod types;

use reqwest::Url;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::upstream::{FetchError, Network};
use lifecycle::{Lifecycle, LifecycleError, WorkerState};
use registry::{CacheRegistry, GenerationNames};
use router::{classify, Route, RouterRules};
use strategy::{StrategyContext, StrategySettings};
use types::{FetchRequest, FetchResponse};

/// Result of handling one intercepted request.
#[derive(Debug)]
pub struct Handled {
    pub route: Route,
    pub result: Result<FetchResponse, FetchError>,
}

/// One deployed version of the caching worker.
pub struct ServiceWorker {
    version: String,
    names: GenerationNames,
    precache: Vec<Url>,
    rules: RouterRules,
    settings: StrategySettings,
    registry: Arc<CacheRegistry>,
    network: Arc<dyn Network>,
    lifecycle: RwLock<Lifecycle>,
}

impl ServiceWorker {
    pub fn new(
        config: &Config,
        registry: Arc<CacheRegistry>,
        network: Arc<dyn Network>,
    ) -> Result<Self, LifecycleError> {
        let origin = &config.upstream_origin;
        let precache = lifecycle::resolve_manifest(origin, &config.precache_assets)?;
        let offline_url = lifecycle::resolve_manifest(origin, &[config.offline_page.clone()])?
            .remove(0);

        Ok(Self {
            version: config.sw_version.clone(),
            names: GenerationNames::for_version(&config.sw_version),
            precache,
            rules: RouterRules {
                weather_prefix: config.weather_path_prefix.clone(),
                icon_hosts: config.icon_hosts.clone(),
            },
            settings: StrategySettings {
                offline_url,
                default_ttl_secs: config.weather_default_ttl_secs,
                revalidate_mode: config.revalidate_mode,
                cache_navigations: config.cache_navigations,
            },
            registry,
            network,
            lifecycle: RwLock::new(Lifecycle::new()),
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn names(&self) -> &GenerationNames {
        &self.names
    }

    pub fn settings(&self) -> &StrategySettings {
        &self.settings
    }

    pub async fn state(&self) -> WorkerState {
        self.lifecycle.read().await.state()
    }

    pub async fn is_controlling(&self) -> bool {
        let lifecycle = self.lifecycle.read().await;
        lifecycle.state().can_intercept() && lifecycle.claimed()
    }

    /// Precaches the manifest. On failure the worker becomes redundant and is
    /// never activated.
    pub async fn install(&self) -> Result<(), LifecycleError> {
        {
            let mut lifecycle = self.lifecycle.write().await;
            lifecycle.begin_install()?;
        }
        tracing::info!("Installing worker {}", self.version);

        let result = lifecycle::precache(
            &self.registry,
            &self.names,
            &self.precache,
            self.network.as_ref(),
        )
        .await;

        let mut lifecycle = self.lifecycle.write().await;
        match result {
            Ok(_) => {
                lifecycle.finish_install();
                Ok(())
            }
            Err(e) => {
                tracing::error!("Install of worker {} failed: {}", self.version, e);
                lifecycle.fail();
                Err(e)
            }
        }
    }

    /// Deletes superseded generations, then claims clients. Returns the deleted
    /// generation names; running it again is a no-op.
    pub async fn activate(&self) -> Result<Vec<String>, LifecycleError> {
        // Held across cleanup so no request is served mid-deletion.
        let mut lifecycle = self.lifecycle.write().await;
        lifecycle.check_activate()?;

        let deleted = lifecycle::evict_stale_generations(&self.registry, &self.names).await;
        lifecycle.claim();

        tracing::info!("Worker {} active, controlling clients", self.version);
        Ok(deleted)
    }

    pub async fn retire(&self) {
        self.lifecycle.write().await.retire();
        tracing::info!("Worker {} is redundant", self.version);
    }

    /// The fetch event: classify, then run the matching strategy. Requests
    /// reach the network untouched while this worker is not in control.
    pub async fn handle_fetch(&self, request: FetchRequest) -> Handled {
        let route = if self.is_controlling().await {
            classify(&request, &self.rules)
        } else {
            Route::Passthrough
        };

        let ctx = StrategyContext {
            registry: &self.registry,
            network: &self.network,
            names: &self.names,
            settings: &self.settings,
        };

        let result = match route {
            Route::Passthrough => self.network.fetch(&request).await,
            Route::CacheFirst => strategy::cache_first::handle(&ctx, &request).await,
            Route::NetworkFirst => Ok(strategy::network_first::handle(&ctx, &request).await),
            Route::Revalidate(envelope) => {
                Ok(strategy::revalidate::handle(&ctx, &request, envelope).await)
            }
        };

        Handled { route, result }
    }
}

/// The registration: owns the shared registry and whichever worker is active.
pub struct WorkerHost {
    registry: Arc<CacheRegistry>,
    network: Arc<dyn Network>,
    active: RwLock<Option<Arc<ServiceWorker>>>,
}

impl WorkerHost {
    pub fn new(registry: Arc<CacheRegistry>, network: Arc<dyn Network>) -> Self {
        Self {
            registry,
            network,
            active: RwLock::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn build_worker(&self, config: &Config) -> Result<ServiceWorker, LifecycleError> {
        ServiceWorker::new(config, self.registry.clone(), self.network.clone())
    }

    pub async fn active(&self) -> Option<Arc<ServiceWorker>> {
        self.active.read().await.clone()
    }

    /// Installs `worker` and, because it skips waiting, activates it right
    /// away. The previous worker stays in control if install fails.
    pub async fn register(
        &self,
        worker: ServiceWorker,
    ) -> Result<Arc<ServiceWorker>, LifecycleError> {
        let worker = Arc::new(worker);
        worker.install().await?;

        // Requests arriving during the handover wait here for the new worker.
        let mut active = self.active.write().await;
        if let Some(previous) = active.as_ref() {
            previous.retire().await;
        }

        let deleted = worker.activate().await?;
        if !deleted.is_empty() {
            tracing::info!("Removed {} superseded generations", deleted.len());
        }

        *active = Some(worker.clone());
        Ok(worker)
    }

    pub async fn handle_fetch(&self, request: FetchRequest) -> Handled {
        match self.active().await {
            Some(worker) => worker.handle_fetch(request).await,
            None => Handled {
                route: Route::Passthrough,
                result: self.network.fetch(&request).await,
            },
        }
    }
}
