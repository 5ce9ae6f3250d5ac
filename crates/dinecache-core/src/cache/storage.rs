use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::net::{fetch_ok, Network, NetworkError, Request, Response};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Invalid cache generation name: {0:?}")]
    InvalidGeneration(String),

    #[error("Cache storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Unreadable cache entry: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Lookup key of a cache entry: a URL without fragment, and for some
/// resources without query string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn exact(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self(url.into())
    }

    pub fn ignoring_query(url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        url.set_query(None);
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A stored response and when it was captured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub response: Response,
    pub cached_at: DateTime<Utc>,
}

/// Result of adding many URLs; one failure never stops the others.
#[derive(Debug, Default)]
pub struct AddAllReport {
    pub cached: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl AddAllReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One open cache generation: a sled tree of URL key to captured response.
pub struct Cache {
    generation: String,
    tree: sled::Tree,
}

impl Cache {
    pub fn generation(&self) -> &str {
        &self.generation
    }

    pub async fn lookup(&self, key: &CacheKey) -> Option<Response> {
        self.entry(key).await.map(|entry| entry.response)
    }

    /// The stored entry. Unreadable entries count as misses.
    pub async fn entry(&self, key: &CacheKey) -> Option<CachedResponse> {
        let bytes = match self.tree.get(key.as_str()) {
            Ok(bytes) => bytes?,
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Cache read failed");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(key = key.as_str(), error = %e, "Ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Store `response` under `key`, replacing any earlier entry.
    pub async fn put(&self, key: CacheKey, response: Response) -> Result<(), CacheError> {
        let entry = CachedResponse {
            response,
            cached_at: Utc::now(),
        };
        self.tree.insert(key.as_str(), serde_json::to_vec(&entry)?)?;
        self.tree.flush_async().await?;
        Ok(())
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<bool, CacheError> {
        let existed = self.tree.remove(key.as_str())?.is_some();
        if existed {
            self.tree.flush_async().await?;
        }
        Ok(existed)
    }

    /// Fetch `url` and store the response. Non-success statuses are errors
    /// and nothing is stored.
    pub async fn add(&self, network: &dyn Network, url: &Url) -> Result<(), CacheError> {
        let response = fetch_ok(network, Request::from_url(reqwest::Method::GET, url.clone())).await?;
        self.put(CacheKey::exact(url), response).await
    }

    /// Add every URL, at most `concurrency` at a time. Each URL succeeds or
    /// fails on its own; failures are logged and reported.
    pub async fn add_all(&self, network: &dyn Network, urls: &[Url], concurrency: usize) -> AddAllReport {
        let results: Vec<(String, Result<(), CacheError>)> = stream::iter(urls.to_vec())
            .map(|url| async move {
                let result = self.add(network, &url).await;
                (url.to_string(), result)
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut report = AddAllReport::default();
        for (url, result) in results {
            match result {
                Ok(()) => report.cached.push(url),
                Err(e) => {
                    warn!(url = %url, error = %e, "Failed to cache asset");
                    report.failed.push((url, e.to_string()));
                }
            }
        }
        report
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        self.tree
            .iter()
            .keys()
            .filter_map(|key| key.ok())
            .filter_map(|key| String::from_utf8(key.to_vec()).ok())
            .map(CacheKey)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// All cache generations, one sled tree each, in one directory.
pub struct CacheStorage {
    db: sled::Db,
}

impl CacheStorage {
    pub fn new(root: &Path) -> Result<Self, CacheError> {
        let db = sled::Config::new().path(root).flush_every_ms(None).open()?;
        Ok(Self { db })
    }

    fn check_generation(generation: &str) -> Result<(), CacheError> {
        let valid = !generation.is_empty()
            && !generation.starts_with("__")
            && generation
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(())
        } else {
            Err(CacheError::InvalidGeneration(generation.to_string()))
        }
    }

    /// Open (creating if needed) a generation.
    pub async fn open(&self, generation: &str) -> Result<Arc<Cache>, CacheError> {
        Self::check_generation(generation)?;
        let tree = self.db.open_tree(generation)?;
        debug!(generation, entries = tree.len(), "Opened cache generation");
        Ok(Arc::new(Cache {
            generation: generation.to_string(),
            tree,
        }))
    }

    /// Names of the stored generations, sorted.
    pub async fn generations(&self) -> Result<Vec<String>, CacheError> {
        let mut names: Vec<String> = self
            .db
            .tree_names()
            .into_iter()
            .filter_map(|name| String::from_utf8(name.to_vec()).ok())
            .filter(|name| Self::check_generation(name).is_ok())
            .collect();
        names.sort();
        Ok(names)
    }

    pub async fn delete(&self, generation: &str) -> Result<bool, CacheError> {
        Self::check_generation(generation)?;
        let dropped = self.db.drop_tree(generation)?;
        self.db.flush_async().await?;
        Ok(dropped)
    }

    /// Delete every generation except `current`. Returns the deleted names.
    pub async fn delete_stale(&self, current: &str) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();
        for generation in self.generations().await? {
            if generation != current && self.delete(&generation).await? {
                deleted.push(generation);
            }
        }
        if !deleted.is_empty() {
            info!(current, deleted = ?deleted, "Removed stale cache generations");
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockNetwork;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_cache_keys() {
        let a = url("http://localhost:8000/restaurant.html?id=7#reviews");
        let b = url("http://localhost:8000/restaurant.html?id=42");
        assert_eq!(CacheKey::ignoring_query(&a), CacheKey::ignoring_query(&b));
        assert_ne!(CacheKey::exact(&a), CacheKey::exact(&b));
        assert_eq!(CacheKey::exact(&a).as_str(), "http://localhost:8000/restaurant.html?id=7");
    }

    #[tokio::test]
    async fn test_put_persists_across_storage_instances() {
        let dir = tempfile::tempdir().unwrap();
        let key = CacheKey::exact(&url("http://localhost:8000/css/styles.css"));
        {
            let storage = CacheStorage::new(dir.path()).unwrap();
            let cache = storage.open("app-1").await.unwrap();
            cache.put(key.clone(), Response::new(200, "body {}")).await.unwrap();
        }

        let storage = CacheStorage::new(dir.path()).unwrap();
        let cache = storage.open("app-1").await.unwrap();
        assert_eq!(cache.lookup(&key).await.unwrap().body, b"body {}".to_vec());
        assert_eq!(cache.keys(), vec![key]);
    }

    #[tokio::test]
    async fn test_put_replaces_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new(dir.path()).unwrap();
        let cache = storage.open("app-1").await.unwrap();
        let key = CacheKey::exact(&url("http://localhost:8000/img/1.jpg"));
        let other = CacheKey::exact(&url("http://localhost:8000/img/2.jpg"));

        cache.put(key.clone(), Response::new(200, vec![1u8])).await.unwrap();
        cache.put(other.clone(), Response::new(200, vec![2u8])).await.unwrap();
        cache.put(key.clone(), Response::new(200, vec![3u8])).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.lookup(&key).await.unwrap().body, vec![3u8]);
        assert_eq!(cache.lookup(&other).await.unwrap().body, vec![2u8]);
        assert!(cache.delete(&other).await.unwrap());
        assert!(cache.lookup(&other).await.is_none());
    }

    #[tokio::test]
    async fn test_add_all_continues_past_failures() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        network.respond("http://localhost:8000/a.js", Response::new(200, "a"));
        network.respond("http://localhost:8000/c.js", Response::new(200, "c"));

        let storage = CacheStorage::new(dir.path()).unwrap();
        let cache = storage.open("app-1").await.unwrap();
        let urls = vec![
            url("http://localhost:8000/a.js"),
            url("http://localhost:8000/b.js"),
            url("http://localhost:8000/c.js"),
        ];
        let report = cache.add_all(network.as_ref(), &urls, 2).await;

        assert_eq!(report.cached.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "http://localhost:8000/b.js");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_stale_keeps_current_generation() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new(dir.path()).unwrap();
        let key = CacheKey::exact(&url("http://localhost:8000/"));
        for generation in ["app-0.0.1", "app-0.0.2", "app-0.0.3"] {
            let cache = storage.open(generation).await.unwrap();
            cache.put(key.clone(), Response::new(200, generation)).await.unwrap();
        }

        let deleted = storage.delete_stale("app-0.0.3").await.unwrap();
        assert_eq!(deleted, vec!["app-0.0.1".to_string(), "app-0.0.2".to_string()]);
        assert_eq!(storage.generations().await.unwrap(), vec!["app-0.0.3".to_string()]);

        let reopened = storage.open("app-0.0.1").await.unwrap();
        assert!(reopened.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_generation_name() {
        let dir = tempfile::tempdir().unwrap();
        let storage = CacheStorage::new(dir.path()).unwrap();
        assert!(matches!(
            storage.open("../escape").await,
            Err(CacheError::InvalidGeneration(_))
        ));
    }
}
