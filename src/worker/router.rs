use reqwest::Method;

use super::freshness::Envelope;
use super::types::FetchRequest;

/// Strategy selected for an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Not intercepted; goes straight to the network.
    Passthrough,
    CacheFirst,
    NetworkFirst,
    /// Stale-while-revalidate with a TTL read from the given envelope.
    Revalidate(Envelope),
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Passthrough => "passthrough",
            Route::CacheFirst => "cache-first",
            Route::NetworkFirst => "network-first",
            Route::Revalidate(_) => "revalidate",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterRules {
    pub weather_prefix: String,
    pub icon_hosts: Vec<String>,
}

impl RouterRules {
    fn is_icon_host(&self, host: &str) -> bool {
        self.icon_hosts
            .iter()
            .any(|candidate| candidate.eq_ignore_ascii_case(host))
    }
}

/// Maps a request to exactly one route; first matching rule wins.
pub fn classify(request: &FetchRequest, rules: &RouterRules) -> Route {
    if request.method != Method::GET || !matches!(request.url.scheme(), "http" | "https") {
        return Route::Passthrough;
    }

    if request.url.path().starts_with(&rules.weather_prefix) {
        return Route::Revalidate(Envelope::Json);
    }
    if request
        .url
        .host_str()
        .is_some_and(|host| rules.is_icon_host(host))
    {
        return Route::Revalidate(Envelope::StoredAt);
    }

    if request.accepts_html() {
        return Route::NetworkFirst;
    }

    Route::CacheFirst
}
