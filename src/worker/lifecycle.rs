//! Worker lifecycle: precache on install, generation cleanup and client claim
//! on activate.
//!
//! ```text
//! Uninstalled ──install──▶ Installing ──ok──▶ Waiting ──activate──▶ Active
//!      ▲                        │                                     │
//!      └──── (retry) ◀── Redundant ◀──fail                 retire ────┘
//! ```

use reqwest::Url;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::registry::{CacheRegistry, GenerationNames};
use super::types::{FetchRequest, FetchResponse};
use crate::upstream::{FetchError, Network};

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Cannot {action} a worker that is {state}")]
    InvalidTransition {
        action: &'static str,
        state: WorkerState,
    },
    #[error("Precache of {url} failed: {source}")]
    PrecacheFailed {
        url: Url,
        #[source]
        source: FetchError,
    },
    #[error("Precache of {url} returned HTTP {status}")]
    PrecacheRejected { url: Url, status: u16 },
    #[error("Invalid asset path {path}: {reason}")]
    InvalidAsset { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Uninstalled,
    Installing,
    Waiting,
    Active,
    Redundant,
}

impl WorkerState {
    pub fn can_intercept(&self) -> bool {
        matches!(self, WorkerState::Active)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Uninstalled => "uninstalled",
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// State machine for one worker version.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: WorkerState,
    claimed: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: WorkerState::Uninstalled,
            claimed: false,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn claimed(&self) -> bool {
        self.claimed
    }

    pub fn begin_install(&mut self) -> Result<(), LifecycleError> {
        match self.state {
            WorkerState::Uninstalled | WorkerState::Redundant => {
                self.state = WorkerState::Installing;
                self.claimed = false;
                Ok(())
            }
            state => Err(LifecycleError::InvalidTransition {
                action: "install",
                state,
            }),
        }
    }

    pub fn finish_install(&mut self) {
        self.state = WorkerState::Waiting;
    }

    pub fn fail(&mut self) {
        self.state = WorkerState::Redundant;
        self.claimed = false;
    }

    pub fn check_activate(&self) -> Result<(), LifecycleError> {
        match self.state {
            WorkerState::Waiting | WorkerState::Active => Ok(()),
            state => Err(LifecycleError::InvalidTransition {
                action: "activate",
                state,
            }),
        }
    }

    /// Takes control of open clients. Only valid once cleanup has finished.
    pub fn claim(&mut self) {
        self.state = WorkerState::Active;
        self.claimed = true;
    }

    pub fn retire(&mut self) {
        self.state = WorkerState::Redundant;
        self.claimed = false;
    }
}

/// Resolves manifest paths against the origin.
pub fn resolve_manifest(origin: &Url, paths: &[String]) -> Result<Vec<Url>, LifecycleError> {
    paths
        .iter()
        .map(|path| {
            origin.join(path).map_err(|e| LifecycleError::InvalidAsset {
                path: path.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Fetches every asset, then writes them all; any failure writes nothing.
pub async fn precache(
    registry: &CacheRegistry,
    names: &GenerationNames,
    manifest: &[Url],
    network: &dyn Network,
) -> Result<usize, LifecycleError> {
    let mut fetched: Vec<(FetchRequest, FetchResponse)> = Vec::with_capacity(manifest.len());

    for url in manifest {
        let request = FetchRequest::get(url.clone());
        let response = network
            .fetch(&request)
            .await
            .map_err(|source| LifecycleError::PrecacheFailed {
                url: url.clone(),
                source,
            })?;
        if !response.is_success() {
            return Err(LifecycleError::PrecacheRejected {
                url: url.clone(),
                status: response.status.as_u16(),
            });
        }
        fetched.push((request, response));
    }

    let generation = registry.open(&names.static_assets).await;
    let now = chrono::Utc::now();
    for (request, response) in &fetched {
        generation.put(request.key(), response.clone().stamped(now)).await;
    }

    tracing::info!("Precached {} assets into {}", fetched.len(), names.static_assets);
    Ok(fetched.len())
}

/// Deletes every generation not owned by `names`, one after another.
pub async fn evict_stale_generations(
    registry: &CacheRegistry,
    names: &GenerationNames,
) -> Vec<String> {
    let mut deleted = Vec::new();
    for name in registry.keys().await {
        if names.contains(&name) {
            continue;
        }
        if registry.delete(&name).await {
            tracing::info!("Deleting old cache: {}", name);
            deleted.push(name);
        }
    }
    deleted
}
