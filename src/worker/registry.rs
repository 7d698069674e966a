use moka::future::Cache;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::types::{FetchResponse, RequestKey};

pub type EntryCache = Cache<RequestKey, FetchResponse>;

fn init_entries(max_entries: u64) -> EntryCache {
    // No time-based eviction: freshness belongs to the strategies.
    Cache::builder().max_capacity(max_entries).build()
}

/// Names of the two generations owned by one worker version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationNames {
    pub static_assets: String,
    pub dynamic: String,
}

impl GenerationNames {
    pub fn for_version(version: &str) -> Self {
        Self {
            static_assets: format!("static-{}", version),
            dynamic: format!("dynamic-{}", version),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        name == self.static_assets || name == self.dynamic
    }
}

/// A named, versioned bucket of request to response pairs.
#[derive(Clone)]
pub struct CacheGeneration {
    name: Arc<str>,
    entries: EntryCache,
}

impl CacheGeneration {
    fn new(name: &str, max_entries: u64) -> Self {
        Self {
            name: Arc::from(name),
            entries: init_entries(max_entries),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn match_request(&self, key: &RequestKey) -> Option<FetchResponse> {
        self.entries.get(key).await
    }

    pub async fn put(&self, key: RequestKey, response: FetchResponse) {
        self.entries.insert(key, response).await;
    }

    pub async fn delete(&self, key: &RequestKey) -> bool {
        self.entries.remove(key).await.is_some()
    }

    pub fn keys(&self) -> Vec<RequestKey> {
        self.entries.iter().map(|(key, _)| (*key).clone()).collect()
    }

    pub async fn len(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}

/// Origin-wide storage of cache generations, shared by every worker version.
pub struct CacheRegistry {
    generations: RwLock<HashMap<String, CacheGeneration>>,
    max_entries: u64,
}

impl CacheRegistry {
    pub fn new(max_entries: u64) -> Self {
        Self {
            generations: RwLock::new(HashMap::new()),
            max_entries,
        }
    }

    /// Opens a generation, creating it when absent.
    pub async fn open(&self, name: &str) -> CacheGeneration {
        if let Some(generation) = self.generations.read().await.get(name) {
            return generation.clone();
        }

        let mut generations = self.generations.write().await;
        generations
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating cache generation {}", name);
                CacheGeneration::new(name, self.max_entries)
            })
            .clone()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.generations.read().await.contains_key(name)
    }

    pub async fn delete(&self, name: &str) -> bool {
        let removed = self.generations.write().await.remove(name);
        match removed {
            Some(generation) => {
                generation.entries.invalidate_all();
                true
            }
            None => false,
        }
    }

    /// Generation names in sorted order.
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.generations.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// First match across every generation. `preferred` is searched first, then
    /// static generations before dynamic ones, newest name first.
    pub async fn match_any(&self, key: &RequestKey, preferred: &str) -> Option<FetchResponse> {
        let generations: Vec<CacheGeneration> = {
            let guard = self.generations.read().await;
            let mut generations: Vec<CacheGeneration> = guard.values().cloned().collect();
            generations.sort_by_key(|generation| {
                let name = generation.name();
                (
                    name != preferred,
                    !name.starts_with("static-"),
                    Reverse(name.to_string()),
                )
            });
            generations
        };

        for generation in generations {
            if let Some(response) = generation.match_request(key).await {
                return Some(response);
            }
        }
        None
    }

    pub async fn summary(&self) -> Vec<(String, u64)> {
        let generations: Vec<CacheGeneration> =
            self.generations.read().await.values().cloned().collect();

        let mut summary = Vec::with_capacity(generations.len());
        for generation in generations {
            summary.push((generation.name().to_string(), generation.len().await));
        }
        summary.sort();
        summary
    }
}
