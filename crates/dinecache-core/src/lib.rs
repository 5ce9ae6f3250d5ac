//! dinecache core - the offline-first data layer of the restaurant reviews app.
//!
//! This crate owns everything between the page code and the network:
//!
//! - `store`: the versioned, partitioned local database and its migrator
//! - `cache`: generations of captured HTTP responses (the byte cache)
//! - `proxy`: the request interceptor deciding cache vs network per request
//! - `reviews`: merging stored and freshly fetched reviews per restaurant
//! - `favorites`: optimistic favorite toggles with best-effort server sync
//! - `precache`: install-time population of the byte cache
//! - `data`: the page-side read API (restaurant lists, filters, details)
//! - `worker`/`registration`: the worker lifecycle and the page handoff

pub mod cache;
pub mod config;
pub mod data;
pub mod favorites;
pub mod fetched;
pub mod models;
pub mod net;
pub mod precache;
pub mod proxy;
pub mod registration;
pub mod reviews;
pub mod store;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{Cache, CacheError, CacheKey, CacheStorage};
pub use config::Config;
pub use data::{DataClient, DataError};
pub use favorites::{FavoriteSync, ServerSync, SyncOutcome};
pub use fetched::{Fetched, Source};
pub use models::{Restaurant, RestaurantId, Review, ReviewId};
pub use net::{HttpNetwork, Network, NetworkError, Request, Response};
pub use precache::{AssetPrecacher, PrecacheReport};
pub use proxy::CacheProxy;
pub use registration::{FeatureSupport, PageContext};
pub use reviews::ReviewReconciler;
pub use store::{Database, Key, KeyRange, StoreError, StoreHandle};
pub use worker::{ServiceWorker, WorkerMessage};
