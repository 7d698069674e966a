use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONNECTION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE};
use serde::Serialize;

/// Split a comma separated setting, dropping blanks
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Remove headers that only describe a single connection
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in [CONNECTION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE] {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove("proxy-connection");
}

/// Error response helper
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorResponse {
    pub fn new(error: &str, code: &str) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
            timestamp: Utc::now(),
        }
    }
}
