//! Install-time population of the byte cache.
//!
//! The precache list is the configured static list plus the one asset the
//! page picked by feature detection and left in the `files` partition before
//! the worker installed. A missing handoff value just means the static list.

use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheStorage};
use crate::net::Network;
use crate::store::{StoreHandle, DYNAMIC_ASSET_KEY, FILES};

/// What an install managed to cache.
#[derive(Debug, Default)]
pub struct PrecacheReport {
    pub generation: String,
    pub cached: Vec<String>,
    /// URL and reason, for every asset that could not be cached.
    pub failed: Vec<(String, String)>,
}

impl PrecacheReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct AssetPrecacher {
    store: StoreHandle,
    caches: Arc<CacheStorage>,
    network: Arc<dyn Network>,
    generation: String,
    origin: Url,
    static_assets: Vec<String>,
    concurrency: usize,
}

impl AssetPrecacher {
    pub fn new(
        store: StoreHandle,
        caches: Arc<CacheStorage>,
        network: Arc<dyn Network>,
        generation: impl Into<String>,
        origin: Url,
        static_assets: Vec<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            caches,
            network,
            generation: generation.into(),
            origin,
            static_assets,
            concurrency,
        }
    }

    /// The asset the page chose, if it has recorded one.
    pub async fn dynamic_asset(&self) -> Option<String> {
        let db = match self.store.acquire().await {
            Ok(db) => db,
            Err(e) => {
                debug!(error = %e, "No dynamic asset: local database unavailable");
                return None;
            }
        };
        match db.get_as::<String>(FILES, DYNAMIC_ASSET_KEY).await {
            Ok(asset) => asset.filter(|a| !a.trim().is_empty()),
            Err(e) => {
                warn!(error = %e, "Could not read dynamic asset choice");
                None
            }
        }
    }

    /// Static assets plus the dynamic one, without duplicates.
    pub async fn precache_list(&self) -> Vec<String> {
        let mut list = self.static_assets.clone();
        if let Some(asset) = self.dynamic_asset().await {
            if !list.contains(&asset) {
                list.push(asset);
            }
        }
        list
    }

    /// Fill the current cache generation. Individual asset failures are
    /// reported, not returned as errors; only an unusable cache is an error.
    pub async fn install(&self) -> Result<PrecacheReport, CacheError> {
        let cache = self.caches.open(&self.generation).await?;
        let mut report = PrecacheReport {
            generation: self.generation.clone(),
            ..PrecacheReport::default()
        };

        let mut urls = Vec::new();
        for asset in self.precache_list().await {
            match self.origin.join(&asset) {
                Ok(url) => urls.push(url),
                Err(e) => {
                    warn!(asset = %asset, error = %e, "Skipping asset with invalid URL");
                    report.failed.push((asset, e.to_string()));
                }
            }
        }

        let added = cache.add_all(self.network.as_ref(), &urls, self.concurrency).await;
        report.cached = added.cached;
        report.failed.extend(added.failed);

        info!(
            generation = %self.generation,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Precached assets"
        );
        Ok(report)
    }
}
