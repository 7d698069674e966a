use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode, Url};
use std::fmt;

/// An outgoing request from the application shell.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// A browser navigation: a GET asking for an HTML document.
    pub fn navigation(url: Url) -> Self {
        let mut request = Self::get(url);
        request.headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        );
        request
    }

    pub fn key(&self) -> RequestKey {
        RequestKey {
            method: self.method.clone(),
            url: self.url.as_str().to_string(),
        }
    }

    pub fn accepts_html(&self) -> bool {
        self.headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(|value| value.contains("text/html"))
    }
}

/// Identity of a cached request: method plus absolute URL, query included.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    pub fn get(url: &Url) -> Self {
        Self {
            method: Method::GET,
            url: url.as_str().to_string(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// A response from the network or from a cache generation.
///
/// The body is reference counted, so handing one copy to the cache and another
/// to the caller never consumes it twice.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Set on the copy written into a cache generation.
    pub stored_at: Option<DateTime<Utc>>,
}

impl FetchResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            stored_at: None,
        }
    }

    pub fn json(status: StatusCode, value: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self::new(status, headers, value.to_string())
    }

    pub fn html(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/html; charset=utf-8"),
        );
        Self::new(status, headers, body)
    }

    /// The synthetic reply for an API request with neither network nor cache.
    pub fn offline_json() -> Self {
        Self::json(
            StatusCode::SERVICE_UNAVAILABLE,
            &serde_json::json!({ "error": "Offline" }),
        )
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.stored_at = Some(at);
        self
    }
}
