//! Application configuration management.
//!
//! The configuration names the app version (and so the byte cache
//! generation), the site and API locations, the local database, and the
//! static assets to pre-cache.
//!
//! Configuration is stored at `~/.config/dinecache/config.json`; every field
//! is optional and falls back to the defaults below.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "dinecache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Assets every installation caches up front.
const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/index.html",
    "/restaurant.html",
    "/css/styles.css",
    "/data/restaurants.json",
    "/js/",
    "/js/dbhelper.js",
    "/js/main.js",
    "/js/restaurant_info.js",
    "/js/register-sw.js",
    "/node_modules/focus-visible/dist/focus-visible.min.js",
    "/img/ouch.png",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Prefix of the byte cache generation name.
    pub app_name: String,
    /// Bumping this opens a new cache generation.
    pub app_version: String,
    /// Where pages and static assets are served from.
    pub origin: String,
    /// Base URL of the restaurants/reviews API.
    pub api_base_url: String,
    pub db_name: String,
    pub db_version: u32,
    /// Overrides the platform cache directory.
    pub data_dir: Option<PathBuf>,
    /// Restaurant detail page; cached once regardless of query string.
    pub detail_page: String,
    /// Served for image requests that fail offline.
    pub fallback_image: String,
    /// Body of the offline response for everything else.
    pub offline_text: String,
    pub precache: Vec<String>,
    pub request_timeout_secs: u64,
    /// Upper bound on parallel fetches when filling the byte cache.
    pub max_concurrent_requests: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "restaurant-reviews".to_string(),
            app_version: "0.0.1".to_string(),
            origin: "http://localhost:8000/".to_string(),
            api_base_url: "http://localhost:1337/".to_string(),
            db_name: "restaurant-reviews".to_string(),
            db_version: 4,
            data_dir: None,
            detail_page: "/restaurant.html".to_string(),
            fallback_image: "/img/ouch.png".to_string(),
            offline_text: "Not online right now".to_string(),
            precache: DEFAULT_PRECACHE.iter().map(|s| s.to_string()).collect(),
            request_timeout_secs: 30,
            max_concurrent_requests: 10,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory holding the local database and the byte cache.
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.data_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Name of the byte cache generation for this app version.
    pub fn cache_generation(&self) -> String {
        format!("{}-{}", self.app_name, self.app_version)
    }

    pub fn origin_url(&self) -> Result<Url> {
        parse_base(&self.origin).context("Invalid origin")
    }

    pub fn api_url(&self) -> Result<Url> {
        parse_base(&self.api_base_url).context("Invalid API base URL")
    }

    /// Resolve a site-relative path (or absolute URL) against the origin.
    pub fn site_url(&self, path: &str) -> Result<Url> {
        self.origin_url()?
            .join(path)
            .with_context(|| format!("Invalid asset path: {}", path))
    }
}

/// Parse a base URL, adding the trailing slash `Url::join` needs to keep the
/// last path segment.
fn parse_base(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
