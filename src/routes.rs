use axum::{
    body::Body,
    extract::{Request, State},
    http::{header::CONTENT_LENGTH, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use reqwest::Url;
use serde::Serialize;
use std::sync::Arc;

use crate::{
    config::Config,
    utils::ErrorResponse,
    worker::{
        lifecycle::WorkerState,
        strategy::RevalidateMode,
        types::{FetchRequest, FetchResponse},
        WorkerHost,
    },
};

const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;
const ROUTE_HEADER: &str = "x-cache-route";

// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub host: Arc<WorkerHost>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct GenerationStatus {
    pub name: String,
    pub entries: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub worker_version: Option<String>,
    pub state: Option<WorkerState>,
    pub controlling: bool,
    pub revalidate_mode: Option<RevalidateMode>,
    pub generations: Vec<GenerationStatus>,
}

impl IntoResponse for FetchResponse {
    fn into_response(self) -> Response {
        let mut headers = self.headers;
        headers.remove(CONTENT_LENGTH);

        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }
}

// Route handlers
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let generations = state
        .host
        .registry()
        .summary()
        .await
        .into_iter()
        .map(|(name, entries)| GenerationStatus { name, entries })
        .collect();

    let response = match state.host.active().await {
        Some(worker) => StatusResponse {
            worker_version: Some(worker.version().to_string()),
            state: Some(worker.state().await),
            controlling: worker.is_controlling().await,
            revalidate_mode: Some(worker.settings().revalidate_mode),
            generations,
        },
        None => StatusResponse {
            worker_version: None,
            state: None,
            controlling: false,
            revalidate_mode: None,
            generations,
        },
    };

    Json(response)
}

/// Every request the server does not own is a fetch event for the worker.
pub async fn intercept(State(state): State<AppState>, request: Request) -> Response {
    let fetch_request = match to_fetch_request(&state.config, request).await {
        Ok(fetch_request) => fetch_request,
        Err(response) => return response,
    };

    let handled = state.host.handle_fetch(fetch_request).await;

    let mut response = match handled.result {
        Ok(fetched) => fetched.into_response(),
        Err(e) => {
            tracing::error!("Upstream fetch failed: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(ErrorResponse::new(&e.to_string(), "BAD_GATEWAY")),
            )
                .into_response()
        }
    };

    response
        .headers_mut()
        .insert(ROUTE_HEADER, HeaderValue::from_static(handled.route.as_str()));
    response
}

async fn to_fetch_request(config: &Config, request: Request) -> Result<FetchRequest, Response> {
    let (parts, body) = request.into_parts();

    let url = resolve_target(config, &parts.uri).map_err(|e| {
        tracing::warn!("Rejecting request target {}: {}", parts.uri, e);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(&e, "INVALID_TARGET")),
        )
            .into_response()
    })?;

    let body = axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|e| {
            (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ErrorResponse::new(&e.to_string(), "BODY_REJECTED")),
            )
                .into_response()
        })?;

    Ok(FetchRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body,
    })
}

/// Absolute-form targets keep their host, which must be the upstream origin or
/// an icon host; origin-form targets resolve against the upstream origin.
fn resolve_target(config: &Config, uri: &Uri) -> Result<Url, String> {
    if uri.scheme().is_some() {
        let url = Url::parse(&uri.to_string()).map_err(|e| e.to_string())?;
        if !is_served_target(config, &url) {
            return Err(format!(
                "{} is not served by this worker",
                url.origin().ascii_serialization()
            ));
        }
        return Ok(url);
    }

    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    config
        .upstream_origin
        .join(path_and_query)
        .map_err(|e| e.to_string())
}

fn is_served_target(config: &Config, url: &Url) -> bool {
    if url.origin() == config.upstream_origin.origin() {
        return true;
    }

    url.host_str().is_some_and(|host| {
        config
            .icon_hosts
            .iter()
            .any(|icon_host| icon_host.eq_ignore_ascii_case(host))
    })
}

// Create the router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/__worker/health", get(health))
        .route("/__worker/status", get(status))
        .fallback(intercept)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::mock::MockNetwork;
    use crate::worker::registry::CacheRegistry;
    use axum::http::header::ACCEPT;

    const ORIGIN: &str = "http://app.test";

    async fn app_state(network: &Arc<MockNetwork>) -> AppState {
        let config = Config::with_origin(Url::parse(ORIGIN).unwrap());
        for path in &config.precache_assets {
            let url = Url::parse(ORIGIN).unwrap().join(path).unwrap();
            network.respond(
                url.as_str(),
                FetchResponse::html(StatusCode::OK, format!("precached {}", path)),
            );
        }

        let host = Arc::new(WorkerHost::new(
            Arc::new(CacheRegistry::new(100)),
            network.clone(),
        ));
        host.register(host.build_worker(&config).unwrap())
            .await
            .unwrap();

        AppState {
            config: Arc::new(config),
            host,
        }
    }

    async fn body_bytes(response: Response) -> bytes::Bytes {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
    }

    fn icon_config() -> Config {
        let mut config = Config::with_origin(Url::parse(ORIGIN).unwrap());
        config.icon_hosts = vec!["openweathermap.org".to_string()];
        config
    }

    #[test]
    fn test_resolve_target() {
        let config = icon_config();

        let uri: Uri = "/api/weather?zip=100-0001&country=JP".parse().unwrap();
        assert_eq!(
            resolve_target(&config, &uri).unwrap().as_str(),
            "http://app.test/api/weather?zip=100-0001&country=JP"
        );

        let uri: Uri = "https://openweathermap.org/img/wn/01d.png".parse().unwrap();
        assert_eq!(
            resolve_target(&config, &uri).unwrap().as_str(),
            "https://openweathermap.org/img/wn/01d.png"
        );

        let uri: Uri = "http://app.test/index.html".parse().unwrap();
        assert!(resolve_target(&config, &uri).is_ok());
    }

    #[test]
    fn test_resolve_target_rejects_foreign_hosts() {
        let config = icon_config();

        for target in [
            "http://169.254.169.254/latest/meta-data/",
            "http://localhost:6379/",
            "http://app.test:9000/admin",
        ] {
            let uri: Uri = target.parse().unwrap();
            assert!(resolve_target(&config, &uri).is_err(), "{} was accepted", target);
        }
    }

    #[tokio::test]
    async fn test_foreign_absolute_target_is_bad_request() {
        let network = Arc::new(MockNetwork::new());
        let state = app_state(&network).await;
        let calls_before = network.calls();

        let request = axum::http::Request::builder()
            .uri("http://internal.example/secrets")
            .body(Body::empty())
            .unwrap();
        let response = intercept(State(state), request).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(network.calls(), calls_before);
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body["code"], "INVALID_TARGET");
    }

    #[tokio::test]
    async fn test_offline_weather_request_through_server() {
        let network = Arc::new(MockNetwork::new());
        let state = app_state(&network).await;
        network.set_offline(true);

        let request = axum::http::Request::builder()
            .uri("/api/weather?lat=35.6&lon=139.7")
            .body(Body::empty())
            .unwrap();
        let response = intercept(State(state), request).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[ROUTE_HEADER], "revalidate");
        assert_eq!(response.headers()["content-type"], "application/json");
        let body: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "Offline" }));
    }

    #[tokio::test]
    async fn test_offline_navigation_through_server() {
        let network = Arc::new(MockNetwork::new());
        let state = app_state(&network).await;
        network.set_offline(true);

        let request = axum::http::Request::builder()
            .uri("/")
            .header(ACCEPT, "text/html")
            .body(Body::empty())
            .unwrap();
        let response = intercept(State(state), request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ROUTE_HEADER], "network-first");
        assert_eq!(&body_bytes(response).await[..], b"precached /");
    }

    #[tokio::test]
    async fn test_cache_first_miss_offline_is_bad_gateway() {
        let network = Arc::new(MockNetwork::new());
        let state = app_state(&network).await;
        network.set_offline(true);

        let request = axum::http::Request::builder()
            .uri("/assets/app.js")
            .body(Body::empty())
            .unwrap();
        let response = intercept(State(state), request).await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[ROUTE_HEADER], "cache-first");
    }

    #[tokio::test]
    async fn test_status_reports_generations() {
        let network = Arc::new(MockNetwork::new());
        let state = app_state(&network).await;

        let Json(report) = status(State(state)).await;

        assert_eq!(report.worker_version.as_deref(), Some("v5-weather-api"));
        assert_eq!(report.state, Some(WorkerState::Active));
        assert!(report.controlling);
        assert_eq!(report.generations.len(), 1);
        assert_eq!(report.generations[0].name, "static-v5-weather-api");
        assert_eq!(report.generations[0].entries, 5);
    }
}
