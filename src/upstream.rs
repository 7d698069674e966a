use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT_ENCODING, HOST};
use reqwest::redirect::Policy;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::utils::strip_hop_by_hop;
use crate::worker::types::{FetchRequest, FetchResponse};

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Network unreachable: {0}")]
    Unreachable(String),
}

/// The network as seen by the worker.
///
/// An `Err` is a transport failure; any HTTP status, including 4xx and 5xx,
/// is a successful fetch.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}

pub struct UpstreamClient {
    client: Client,
}

impl UpstreamClient {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(concat!("offline-cache-server/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            // Redirects are the shell's business
            .redirect(Policy::none())
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Network for UpstreamClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let mut headers = request.headers.clone();
        headers.remove(HOST);
        // Stored bodies must be plain; the client negotiates and decodes itself.
        headers.remove(ACCEPT_ENCODING);
        strip_hop_by_hop(&mut headers);

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(headers);
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let mut headers: HeaderMap = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes().await?;

        tracing::debug!("{} {} -> {}", request.method, request.url, status);

        Ok(FetchResponse::new(status, headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::registry::CacheRegistry;
    use crate::worker::WorkerHost;
    use flate2::{write::GzEncoder, Compression};
    use reqwest::header::CONTENT_ENCODING;
    use reqwest::{Method, StatusCode, Url};
    use std::io::Write;
    use std::sync::Arc;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FRESH_WEATHER: &str = r#"{"fetched_at":"2099-01-01T00:00:00Z","ttl_seconds":7200}"#;

    fn client_for(origin: &str) -> UpstreamClient {
        let config = Config::with_origin(Url::parse(origin).unwrap());
        UpstreamClient::new(&config).unwrap()
    }

    fn gzip(body: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    async fn mount_gzip_weather(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/weather"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-encoding", "gzip")
                    .set_body_raw(gzip(FRESH_WEATHER), "application/json"),
            )
            .mount(server)
            .await;
    }

    fn browser_get(url: Url) -> FetchRequest {
        let mut request = FetchRequest::get(url);
        request
            .headers
            .insert(ACCEPT_ENCODING, "gzip, deflate, br".parse().unwrap());
        request
    }

    #[tokio::test]
    async fn test_fetch_weather_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/weather"))
            .and(query_param("lat", "35.6"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "fetched_at": "2026-10-16T09:00:00Z",
                "ttl_seconds": 7200,
            })))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/api/weather?lat=35.6&lon=139.7", server.uri())).unwrap();
        let response = client_for(&server.uri())
            .fetch(&FetchRequest::get(url))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["ttl_seconds"], 7200);
    }

    #[tokio::test]
    async fn test_error_status_is_not_a_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing.png", server.uri())).unwrap();
        let response = client_for(&server.uri())
            .fetch(&FetchRequest::get(url))
            .await
            .unwrap();

        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_forwards_method_headers_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"message":"hello"}"#))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/api/chat", server.uri())).unwrap();
        let mut request = FetchRequest::new(Method::POST, url);
        request
            .headers
            .insert("content-type", "application/json".parse().unwrap());
        request.body = r#"{"message":"hello"}"#.into();

        let response = client_for(&server.uri()).fetch(&request).await.unwrap();
        assert_eq!(response.status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_compressed_body_is_decoded() {
        let server = MockServer::start().await;
        mount_gzip_weather(&server).await;

        let url = Url::parse(&format!("{}/api/weather?lat=35.6", server.uri())).unwrap();
        let response = client_for(&server.uri())
            .fetch(&browser_get(url))
            .await
            .unwrap();

        assert!(response.headers.get(CONTENT_ENCODING).is_none());
        assert_eq!(&response.body[..], FRESH_WEATHER.as_bytes());
    }

    #[tokio::test]
    async fn test_compressed_weather_entry_stays_fresh() {
        let server = MockServer::start().await;
        mount_gzip_weather(&server).await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("home"))
            .mount(&server)
            .await;

        let mut config = Config::with_origin(Url::parse(&server.uri()).unwrap());
        config.precache_assets = vec!["/".to_string()];
        let network = Arc::new(UpstreamClient::new(&config).unwrap());
        let host = WorkerHost::new(Arc::new(CacheRegistry::new(100)), network);
        host.register(host.build_worker(&config).unwrap())
            .await
            .unwrap();

        let url = Url::parse(&format!("{}/api/weather?lat=35.6&lon=139.7", server.uri())).unwrap();
        for _ in 0..3 {
            let response = host.handle_fetch(browser_get(url.clone())).await.result.unwrap();
            assert_eq!(&response.body[..], FRESH_WEATHER.as_bytes());
        }

        let weather_hits = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == "/api/weather")
            .count();
        assert_eq!(weather_hits, 1);
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_an_error() {
        // Reserve a port, then close it so nothing is listening there.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let origin = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let url = Url::parse(&format!("{}/index.html", origin)).unwrap();
        let result = client_for(&origin).fetch(&FetchRequest::get(url)).await;

        assert!(matches!(result, Err(FetchError::RequestFailed(_))));
    }
}
