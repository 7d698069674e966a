use anyhow::Context;
use reqwest::Url;
use std::env;
use std::str::FromStr;

use crate::utils::parse_list;
use crate::worker::strategy::RevalidateMode;

const DEFAULT_PRECACHE: &str =
    "/,/index.html,/offline.html,/manifest.json,/monsters/kaiju_brown.png";

#[derive(Clone, Debug)]
pub struct Config {
    pub bind_addr: String,
    pub upstream_origin: Url,
    pub sw_version: String,
    pub precache_assets: Vec<String>,
    pub offline_page: String,
    pub weather_path_prefix: String,
    pub icon_hosts: Vec<String>,
    pub weather_default_ttl_secs: u64,
    pub revalidate_mode: RevalidateMode,
    pub cache_navigations: bool,
    pub upstream_timeout_secs: u64,
    pub cache_max_entries: u64,
}

impl Config {
    /// Defaults for everything except the origin being fronted.
    pub fn with_origin(upstream_origin: Url) -> Self {
        Config {
            bind_addr: "0.0.0.0:8080".to_string(),
            upstream_origin,
            sw_version: "v5-weather-api".to_string(),
            precache_assets: parse_list(DEFAULT_PRECACHE),
            offline_page: "/offline.html".to_string(),
            weather_path_prefix: "/api/weather".to_string(),
            icon_hosts: Vec::new(),
            weather_default_ttl_secs: 7200,
            revalidate_mode: RevalidateMode::OnStale,
            cache_navigations: true,
            upstream_timeout_secs: 30,
            cache_max_entries: 1000,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let origin = env::var("UPSTREAM_ORIGIN")
            .map_err(|_| anyhow::anyhow!("UPSTREAM_ORIGIN not set"))?;
        let origin = Url::parse(&origin)
            .with_context(|| format!("UPSTREAM_ORIGIN is not a valid URL: {}", origin))?;

        let mut config = Config::with_origin(origin);

        if let Ok(addr) = env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(version) = env::var("SW_VERSION") {
            config.sw_version = version;
        }
        if let Ok(assets) = env::var("PRECACHE_ASSETS") {
            config.precache_assets = parse_list(&assets);
        }
        if let Ok(page) = env::var("OFFLINE_PAGE") {
            config.offline_page = page;
        }
        if let Ok(prefix) = env::var("WEATHER_PATH_PREFIX") {
            config.weather_path_prefix = prefix;
        }
        if let Ok(hosts) = env::var("ICON_HOSTS") {
            config.icon_hosts = parse_list(&hosts);
        }
        if let Some(ttl) = parse_var("WEATHER_DEFAULT_TTL_SECS")? {
            config.weather_default_ttl_secs = ttl;
        }
        if let Some(mode) = parse_var("REVALIDATE_MODE")? {
            config.revalidate_mode = mode;
        }
        if let Some(flag) = parse_var("CACHE_NAVIGATIONS")? {
            config.cache_navigations = flag;
        }
        if let Some(secs) = parse_var("UPSTREAM_TIMEOUT_SECS")? {
            config.upstream_timeout_secs = secs;
        }
        if let Some(max) = parse_var("CACHE_MAX_ENTRIES")? {
            config.cache_max_entries = max;
        }

        Ok(config)
    }
}

fn parse_var<T>(name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value {:?}: {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}
