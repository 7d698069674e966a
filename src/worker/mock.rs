use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Barrier;

use super::types::{FetchRequest, FetchResponse};
use crate::upstream::{FetchError, Network};

/// In-memory network keyed by absolute URL. Unknown URLs answer 404.
#[derive(Default)]
pub struct MockNetwork {
    responses: Mutex<HashMap<String, FetchResponse>>,
    offline: AtomicBool,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Barrier>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: FetchResponse) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Holds every fetch until `parties` fetches are in flight at once.
    pub fn hold_until_concurrent(&self, parties: usize) {
        *self.gate.lock().unwrap() = Some(Arc::new(Barrier::new(parties)));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(barrier) = gate {
            barrier.wait().await;
        }

        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::Unreachable(request.url.to_string()));
        }

        let response = self.responses.lock().unwrap().get(request.url.as_str()).cloned();
        Ok(response.unwrap_or_else(|| FetchResponse::html(StatusCode::NOT_FOUND, "not found")))
    }
}
