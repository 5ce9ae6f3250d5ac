//! Classification of intercepted requests by URL shape.

use reqwest::Url;

use crate::models::RestaurantId;
use crate::net::Request;

/// Path extensions answered with the fallback image when offline.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg"];

/// How the proxy treats one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Anything but GET: straight to the network, no cache involvement.
    Passthrough,
    /// `.../reviews/?restaurant_id=<id>`: answered by the review reconciler.
    Reviews(RestaurantId),
    /// The restaurant detail page: one cached shell for every query string.
    DetailPage,
    /// Everything else: cache first, keyed by the exact URL.
    Cached,
}

#[derive(Debug, Clone)]
pub struct Router {
    detail_page: String,
}

impl Router {
    pub fn new(detail_page: &str) -> Self {
        let detail_page = if detail_page.starts_with('/') {
            detail_page.to_string()
        } else {
            format!("/{}", detail_page)
        };
        Self { detail_page }
    }

    pub fn classify(&self, request: &Request) -> Route {
        if !request.is_cacheable() {
            return Route::Passthrough;
        }
        if let Some(restaurant_id) = reviews_target(&request.url) {
            return Route::Reviews(restaurant_id);
        }
        if request.url.path() == self.detail_page {
            return Route::DetailPage;
        }
        Route::Cached
    }
}

fn reviews_target(url: &Url) -> Option<RestaurantId> {
    let path = url.path().trim_end_matches('/');
    if !path.ends_with("/reviews") {
        return None;
    }
    url.query_pairs()
        .find(|(name, _)| name == "restaurant_id")
        .and_then(|(_, value)| value.parse().ok())
}

/// Whether a URL names an image, judged by its path extension.
pub fn is_image(url: &Url) -> bool {
    url.path()
        .rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}
