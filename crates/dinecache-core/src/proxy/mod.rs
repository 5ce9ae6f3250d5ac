//! The request interceptor.
//!
//! Every outbound request of the app goes through [`CacheProxy::handle`]:
//!
//! - anything but GET goes to the network untouched
//! - reviews requests are answered by the [`ReviewReconciler`]
//! - everything else is served cache-first; misses are fetched, archived in
//!   the current cache generation, and returned
//! - an error status from the server is handed back as is, never archived
//! - when the network cannot be reached, images get the fallback image and
//!   everything else a plain-text offline notice with status 404

pub mod route;

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Url;
use tracing::{debug, warn};

use crate::cache::{Cache, CacheKey, CacheStorage};
use crate::models::RestaurantId;
use crate::net::{Network, NetworkError, Request, Response};
use crate::reviews::ReviewReconciler;

pub use route::{is_image, Route, Router};

pub struct CacheProxy {
    caches: Arc<CacheStorage>,
    generation: String,
    network: Arc<dyn Network>,
    reviews: ReviewReconciler,
    router: Router,
    fallback_image: CacheKey,
    offline_text: String,
}

impl CacheProxy {
    pub fn new(
        caches: Arc<CacheStorage>,
        generation: impl Into<String>,
        network: Arc<dyn Network>,
        reviews: ReviewReconciler,
        detail_page: &str,
        fallback_image: &Url,
        offline_text: impl Into<String>,
    ) -> Self {
        Self {
            caches,
            generation: generation.into(),
            network,
            reviews,
            router: Router::new(detail_page),
            fallback_image: CacheKey::exact(fallback_image),
            offline_text: offline_text.into(),
        }
    }

    pub fn generation(&self) -> &str {
        &self.generation
    }

    /// Answer one request. Only passthrough requests can fail; every
    /// intercepted request resolves to a response.
    pub async fn handle(&self, request: Request) -> Result<Response, NetworkError> {
        match self.router.classify(&request) {
            Route::Passthrough => {
                debug!(method = %request.method, url = %request.url, "Passing request through");
                self.network.fetch(request).await
            }
            Route::Reviews(restaurant_id) => Ok(self.serve_reviews(restaurant_id).await),
            Route::DetailPage => {
                let key = CacheKey::ignoring_query(&request.url);
                Ok(self.cache_first(request, key).await)
            }
            Route::Cached => {
                let key = CacheKey::exact(&request.url);
                Ok(self.cache_first(request, key).await)
            }
        }
    }

    async fn serve_reviews(&self, restaurant_id: RestaurantId) -> Response {
        let reviews = self.reviews.reviews_for(restaurant_id).await.into_data();
        match Response::json(&reviews) {
            Ok(response) => response,
            Err(e) => {
                warn!(restaurant_id = %restaurant_id, error = %e, "Failed to encode reviews");
                Response::text(500, &e.to_string())
            }
        }
    }

    async fn current_cache(&self) -> Option<Arc<Cache>> {
        match self.caches.open(&self.generation).await {
            Ok(cache) => Some(cache),
            Err(e) => {
                warn!(generation = %self.generation, error = %e, "Cache unavailable, using network only");
                None
            }
        }
    }

    async fn cache_first(&self, request: Request, key: CacheKey) -> Response {
        let cache = self.current_cache().await;
        if let Some(ref cache) = cache {
            if let Some(hit) = cache.lookup(&key).await {
                debug!(key = key.as_str(), "Cache hit");
                return hit;
            }
        }

        let url = request.url.clone();
        match self.network.fetch(request).await {
            Ok(fresh) if fresh.is_success() => {
                if let Some(ref cache) = cache {
                    // The archived copy is independent of what the caller gets.
                    if let Err(e) = cache.put(key, fresh.clone()).await {
                        warn!(url = %url, error = %e, "Failed to archive response");
                    }
                }
                fresh
            }
            Ok(failed) => {
                debug!(url = %url, status = failed.status, "Network answered with an error status");
                failed
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Network fetch failed");
                self.fallback(&url, cache.as_deref()).await
            }
        }
    }

    async fn fallback(&self, url: &Url, cache: Option<&Cache>) -> Response {
        if is_image(url) {
            if let Some(cache) = cache {
                if let Some(image) = cache.lookup(&self.fallback_image).await {
                    return image;
                }
            }
            warn!(url = %url, "Fallback image is not cached");
        }
        Response::text(404, &self.offline_text)
    }
}

/// Fetching through the proxy is what an intercepted page-side fetch is.
#[async_trait]
impl Network for CacheProxy {
    async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        self.handle(request).await
    }
}
