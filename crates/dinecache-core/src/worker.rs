//! The worker: one value owning the store handle, the byte cache and the
//! request interceptor, driven through install, activate, fetch and message
//! events.

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Url;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::{AddAllReport, CacheError, CacheStorage};
use crate::config::Config;
use crate::data::DataClient;
use crate::favorites::FavoriteSync;
use crate::fetched::Refreshes;
use crate::net::{Network, NetworkError, Request, Response};
use crate::precache::{AssetPrecacher, PrecacheReport};
use crate::proxy::CacheProxy;
use crate::reviews::ReviewReconciler;
use crate::store::StoreHandle;

/// Messages a page can post to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Cache these image URLs (site-relative or absolute).
    CacheImages(Vec<String>),
}

pub struct ServiceWorker {
    config: Config,
    store: StoreHandle,
    caches: Arc<CacheStorage>,
    network: Arc<dyn Network>,
    proxy: Arc<CacheProxy>,
    precacher: AssetPrecacher,
    origin: Url,
    api_base: Url,
    refreshes: Refreshes,
}

impl ServiceWorker {
    /// Worker over the app database and byte cache under the configured
    /// data directory.
    pub fn new(config: Config, network: Arc<dyn Network>) -> Result<Self> {
        let data_dir = config.data_dir()?;
        let store = StoreHandle::for_app(&config, data_dir);
        Self::with_store(config, store, network)
    }

    /// Worker over a given store handle, e.g. [`StoreHandle::unavailable`]
    /// when local storage is off.
    pub fn with_store(config: Config, store: StoreHandle, network: Arc<dyn Network>) -> Result<Self> {
        let origin = config.origin_url()?;
        let api_base = config.api_url()?;
        let fallback_image = config.site_url(&config.fallback_image)?;
        let generation = config.cache_generation();
        let caches = Arc::new(
            CacheStorage::new(&config.data_dir()?.join("caches")).context("Failed to open the byte cache")?,
        );

        let refreshes = Refreshes::default();
        let reviews = ReviewReconciler::new(store.clone(), network.clone(), api_base.clone())
            .with_refreshes(refreshes.clone());
        let proxy = Arc::new(CacheProxy::new(
            caches.clone(),
            generation.clone(),
            network.clone(),
            reviews,
            &config.detail_page,
            &fallback_image,
            config.offline_text.clone(),
        ));
        let precacher = AssetPrecacher::new(
            store.clone(),
            caches.clone(),
            network.clone(),
            generation,
            origin.clone(),
            config.precache.clone(),
            config.max_concurrent_requests,
        );

        Ok(Self {
            config,
            store,
            caches,
            network,
            proxy,
            precacher,
            origin,
            api_base,
            refreshes,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn caches(&self) -> &Arc<CacheStorage> {
        &self.caches
    }

    pub fn proxy(&self) -> &Arc<CacheProxy> {
        &self.proxy
    }

    /// Page-side data access; its requests go through the interceptor.
    pub fn data_client(&self) -> DataClient {
        DataClient::new(self.store.clone(), self.proxy.clone(), self.api_base.clone())
            .with_refreshes(self.refreshes.clone())
    }

    /// Background refreshes started by the interceptor and data clients.
    pub fn refreshes(&self) -> &Refreshes {
        &self.refreshes
    }

    /// Wait for every background refresh to finish. Hosts call this before
    /// shutting down the runtime.
    pub async fn settle(&self) {
        self.refreshes.drain().await;
    }

    pub fn favorites(&self) -> FavoriteSync {
        FavoriteSync::new(self.store.clone(), self.proxy.clone(), self.api_base.clone())
    }

    // ===== Lifecycle =====

    pub async fn install(&self) -> Result<PrecacheReport, CacheError> {
        self.precacher.install().await
    }

    /// Drop every cache generation but the current one. Returns the names
    /// deleted.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        self.caches.delete_stale(self.proxy.generation()).await
    }

    pub async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        self.proxy.handle(request).await
    }

    /// Handle a page message. Work is spawned; the returned handle may be
    /// dropped.
    pub fn message(&self, message: WorkerMessage) -> Option<JoinHandle<AddAllReport>> {
        match message {
            WorkerMessage::CacheImages(images) => {
                let urls: Vec<Url> = images
                    .iter()
                    .filter_map(|image| match self.origin.join(image) {
                        Ok(url) => Some(url),
                        Err(e) => {
                            warn!(image = %image, error = %e, "Skipping image with invalid URL");
                            None
                        }
                    })
                    .collect();
                if urls.is_empty() {
                    return None;
                }

                let caches = self.caches.clone();
                let network = self.network.clone();
                let generation = self.proxy.generation().to_string();
                let concurrency = self.config.max_concurrent_requests;
                Some(tokio::spawn(async move {
                    let cache = match caches.open(&generation).await {
                        Ok(cache) => cache,
                        Err(e) => {
                            warn!(error = %e, "Cannot cache images: cache unavailable");
                            return AddAllReport::default();
                        }
                    };
                    let report = cache.add_all(network.as_ref(), &urls, concurrency).await;
                    debug!(cached = report.cached.len(), failed = report.failed.len(), "Cached posted images");
                    report
                }))
            }
        }
    }
}

/// Build a worker with the HTTP network from `config`.
pub fn http_worker(config: Config) -> Result<ServiceWorker> {
    let timeout = std::time::Duration::from_secs(config.request_timeout_secs);
    let network = crate::net::HttpNetwork::new(timeout).context("Failed to build HTTP client")?;
    ServiceWorker::new(config, Arc::new(network))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheKey;
    use crate::data::DataError;
    use crate::fetched::Source;
    use crate::models::RestaurantId;
    use crate::net::Method;
    use crate::registration::{FeatureSupport, PageContext};
    use crate::store::{DYNAMIC_ASSET_KEY, FILES};
    use crate::test_support::{test_config, MockNetwork};
    use serde_json::json;

    const ORIGIN: &str = "http://localhost:8000/";

    fn site(path: &str) -> String {
        format!("{}{}", ORIGIN, path.trim_start_matches('/'))
    }

    fn config(dir: &std::path::Path) -> Config {
        Config {
            precache: vec!["/".to_string(), "/css/styles.css".to_string()],
            ..test_config(dir)
        }
    }

    fn script_network() -> Arc<MockNetwork> {
        let network = MockNetwork::new();
        network.respond(&site("/"), Response::text(200, "home"));
        network.respond(&site("/css/styles.css"), Response::text(200, "body {}"));
        network.respond(
            &site("/node_modules/vanilla-lazyload/dist/lazyload.min.js"),
            Response::text(200, "lazy"),
        );
        network.respond(&site("/img/1.jpg"), Response::new(200, vec![1u8, 2, 3]));
        network.respond(&site("/img/ouch.png"), Response::new(200, vec![9u8]));
        network
    }

    #[tokio::test]
    async fn test_register_installs_and_posts_images() {
        let dir = tempfile::tempdir().unwrap();
        let network = script_network();
        let worker = ServiceWorker::new(config(dir.path()), network.clone()).unwrap();

        let page = PageContext {
            features: FeatureSupport { intersection_observer: true },
            rendered_images: vec!["/img/1.jpg".to_string()],
            controlled: false,
        };
        let registration = page.register(&worker).await.unwrap();
        assert!(registration.install.is_complete());
        assert_eq!(registration.install.cached.len(), 3);
        assert_eq!(registration.images_posted, 1);
        let images = registration.images.unwrap().await.unwrap();
        assert_eq!(images.cached, vec![site("/img/1.jpg")]);

        let db = worker.store().acquire().await.unwrap();
        let asset: Option<String> = db.get_as(FILES, DYNAMIC_ASSET_KEY).await.unwrap();
        assert!(asset.unwrap().contains("vanilla-lazyload/"));

        // Served from cache once the network is gone.
        network.set_online(false);
        let response = worker.fetch(Request::get(&site("/css/styles.css")).unwrap()).await.unwrap();
        assert_eq!(response.text_body(), "body {}");
    }

    #[tokio::test]
    async fn test_controlled_page_posts_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let worker = ServiceWorker::new(config(dir.path()), script_network()).unwrap();

        let page = PageContext {
            features: FeatureSupport { intersection_observer: false },
            rendered_images: vec!["/img/1.jpg".to_string()],
            controlled: true,
        };
        let registration = page.register(&worker).await.unwrap();
        assert_eq!(registration.images_posted, 0);
        assert!(registration.images.is_none());
        // The compat script is not scripted, so install reports it failed.
        assert_eq!(registration.install.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_posted_images_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let network = script_network();
        let worker = ServiceWorker::new(config(dir.path()), network.clone()).unwrap();

        let task = worker
            .message(WorkerMessage::CacheImages(vec!["/img/1.jpg".to_string()]))
            .unwrap();
        let report = task.await.unwrap();
        assert_eq!(report.cached, vec![site("/img/1.jpg")]);

        network.set_online(false);
        let response = worker.fetch(Request::get(&site("/img/1.jpg")).unwrap()).await.unwrap();
        assert_eq!(response.body, vec![1u8, 2, 3]);
    }

    #[tokio::test]
    async fn test_empty_message_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let worker = ServiceWorker::new(config(dir.path()), MockNetwork::new()).unwrap();
        assert!(worker.message(WorkerMessage::CacheImages(Vec::new())).is_none());
    }

    #[tokio::test]
    async fn test_activate_removes_old_generations() {
        let dir = tempfile::tempdir().unwrap();
        let network = script_network();
        let worker = ServiceWorker::new(config(dir.path()), network).unwrap();

        let old = worker.caches().open("restaurant-reviews-0.0.0").await.unwrap();
        old.put(CacheKey::exact(&Url::parse(ORIGIN).unwrap()), Response::text(200, "old"))
            .await
            .unwrap();
        worker.install().await.unwrap();

        let deleted = worker.activate().await.unwrap();
        assert_eq!(deleted, vec!["restaurant-reviews-0.0.0".to_string()]);
        assert_eq!(
            worker.caches().generations().await.unwrap(),
            vec!["restaurant-reviews-0.0.1".to_string()]
        );
    }

    #[tokio::test]
    async fn test_favorite_update_goes_to_network_even_when_offline() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        let worker = ServiceWorker::new(config(dir.path()), network.clone()).unwrap();
        network.set_online(false);

        let sync = worker.favorites().toggle(RestaurantId(3), true).await;
        assert!(worker.favorites().is_favorite(RestaurantId(3)).await);
        assert!(!matches!(sync.outcome().await, crate::SyncOutcome::Confirmed));
        assert!(network
            .calls()
            .contains(&(Method::PUT, "http://localhost:1337/restaurants/3/?is_favorite=true".to_string())));
    }

    #[tokio::test]
    async fn test_data_client_goes_through_interceptor() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        network.respond_json(
            "http://localhost:1337/restaurants/",
            &json!([{"id": 1, "name": "One", "cuisine_type": "Asian", "neighborhood": "Queens"}]),
        );
        let worker = ServiceWorker::with_store(
            config(dir.path()),
            StoreHandle::unavailable("private mode"),
            network.clone(),
        )
        .unwrap();

        let first = worker.data_client().fetch_restaurants().await.unwrap();
        assert_eq!(first.source, Source::Network);

        // No local snapshot without a store, but the byte cache still answers.
        network.set_online(false);
        let second = worker.data_client().fetch_restaurants().await.unwrap();
        assert_eq!(second.data.len(), 1);
        assert_eq!(network.call_count("http://localhost:1337/restaurants/"), 1);
    }

    #[tokio::test]
    async fn test_server_error_reaches_data_client() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        network.respond(
            "http://localhost:1337/restaurants/",
            Response::text(500, "Internal Server Error"),
        );
        let worker = ServiceWorker::new(config(dir.path()), network.clone()).unwrap();

        let err = worker.data_client().fetch_restaurants().await.unwrap_err();
        assert!(matches!(err, DataError::RequestFailed { status: 500, .. }));
        assert!(err.to_string().contains("500"));

        // Nothing was archived, so the next attempt asks the server again.
        network.respond_json(
            "http://localhost:1337/restaurants/",
            &json!([{"id": 1, "name": "One", "cuisine_type": "Asian", "neighborhood": "Queens"}]),
        );
        let restaurants = worker.data_client().fetch_restaurants().await.unwrap();
        assert_eq!(restaurants.data.len(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_still_gets_offline_text() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        network.set_online(false);
        let worker = ServiceWorker::new(config(dir.path()), network).unwrap();

        let response = worker.fetch(Request::get(&site("/data/restaurants.json")).unwrap()).await.unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(response.text_body(), worker.config().offline_text);
    }

    #[tokio::test]
    async fn test_settle_waits_for_review_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        let worker = ServiceWorker::new(config(dir.path()), network.clone()).unwrap();
        let reviews_url = "http://localhost:1337/reviews/?restaurant_id=2";
        network.respond_json(
            reviews_url,
            &json!([{"id": 7, "restaurant_id": 2, "name": "Ann", "rating": 4, "comments": "Good",
                     "createdAt": 1504095567183i64, "updatedAt": 1504095567183i64}]),
        );

        // First read fills the store from the network.
        worker.fetch(Request::get(reviews_url).unwrap()).await.unwrap();
        assert_eq!(worker.refreshes().pending(), 0);

        // Second read is local-first and spawns a refresh.
        worker.fetch(Request::get(reviews_url).unwrap()).await.unwrap();
        worker.settle().await;
        assert_eq!(worker.refreshes().pending(), 0);
        assert_eq!(network.call_count(reviews_url), 2);
    }
}
