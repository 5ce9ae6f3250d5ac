//! Review reconciliation.
//!
//! Reviews for a restaurant are answered from the local database when any
//! are stored, with a network refresh in the background that replaces the
//! stored set. With nothing stored the caller waits for the network, and if
//! that fails gets a single placeholder review carrying the error message.
//!
//! Fetched records are stored as the server sent them; they are parsed only
//! to answer the caller.

use std::collections::HashSet;
use std::sync::Arc;

use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::fetched::{Fetched, Refreshes};
use crate::models::{RestaurantId, Review};
use crate::net::client::ACCEPT_JSON;
use crate::net::{fetch_ok, Network, NetworkError, Request};
use crate::store::{Key, StoreError, StoreHandle, REVIEWS};

/// Clone is cheap; clones share the store, the network and the refresh
/// tracker.
#[derive(Clone)]
pub struct ReviewReconciler {
    store: StoreHandle,
    network: Arc<dyn Network>,
    api_base: Url,
    refreshes: Refreshes,
}

impl ReviewReconciler {
    pub fn new(store: StoreHandle, network: Arc<dyn Network>, api_base: Url) -> Self {
        Self {
            store,
            network,
            api_base,
            refreshes: Refreshes::default(),
        }
    }

    /// Track background refreshes in `refreshes` instead of a private tracker.
    pub fn with_refreshes(mut self, refreshes: Refreshes) -> Self {
        self.refreshes = refreshes;
        self
    }

    pub fn refreshes(&self) -> &Refreshes {
        &self.refreshes
    }

    /// URL of the reviews endpoint for one restaurant.
    pub fn reviews_url(&self, restaurant_id: RestaurantId) -> Result<Url, NetworkError> {
        let mut url = self
            .api_base
            .join("reviews/")
            .map_err(|e| NetworkError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("restaurant_id", &restaurant_id.to_string());
        Ok(url)
    }

    /// Reviews for `restaurant_id`. Never fails: the worst case is a single
    /// placeholder review.
    pub async fn reviews_for(&self, restaurant_id: RestaurantId) -> Fetched<Vec<Review>> {
        let local = match self.local_reviews(restaurant_id).await {
            Ok(local) => local,
            Err(e) => {
                debug!(restaurant_id = %restaurant_id, error = %e, "No local reviews available");
                Vec::new()
            }
        };

        if !local.is_empty() {
            debug!(restaurant_id = %restaurant_id, count = local.len(), "Serving stored reviews");
            let this = self.clone();
            let refresh = self
                .refreshes
                .spawn(async move { this.refresh(restaurant_id).await });
            return Fetched::local(local, refresh);
        }

        match self.fetch_remote(restaurant_id).await {
            Ok(records) => {
                if let Err(e) = self.store_records(&records).await {
                    warn!(restaurant_id = %restaurant_id, error = %e, "Failed to store fetched reviews");
                }
                Fetched::network(parse_reviews(records))
            }
            Err(e) => {
                warn!(restaurant_id = %restaurant_id, error = %e, "Reviews unavailable");
                let message = format!("Unable to load reviews right now ({})", e);
                Fetched::placeholder(vec![Review::placeholder(restaurant_id, message)])
            }
        }
    }

    /// Stored reviews for one restaurant. Records that no longer parse are skipped.
    pub async fn local_reviews(&self, restaurant_id: RestaurantId) -> Result<Vec<Review>, StoreError> {
        let db = self.store.acquire().await?;
        let records = db.get_all(REVIEWS, None, None).await?;
        Ok(parse_reviews(records)
            .into_iter()
            .filter(|review| review.belongs_to(restaurant_id))
            .collect())
    }

    async fn fetch_remote(&self, restaurant_id: RestaurantId) -> Result<Vec<Value>, NetworkError> {
        let url = self.reviews_url(restaurant_id)?;
        let request = Request::from_url(reqwest::Method::GET, url).with_header(ACCEPT_JSON.0, ACCEPT_JSON.1);
        let response = fetch_ok(self.network.as_ref(), request).await?;
        response.parse_json()
    }

    async fn store_records(&self, records: &[Value]) -> Result<(), StoreError> {
        let db = self.store.acquire().await?;
        for record in records {
            if let Err(e) = db.put(REVIEWS, record.clone()).await {
                warn!(error = %e, "Skipping review that cannot be stored");
            }
        }
        Ok(())
    }

    /// Background refresh: replace the stored reviews of one restaurant with
    /// the freshly fetched set. An empty or failed fetch leaves them alone.
    async fn refresh(&self, restaurant_id: RestaurantId) {
        let fresh = match self.fetch_remote(restaurant_id).await {
            Ok(fresh) if !fresh.is_empty() => fresh,
            Ok(_) => {
                debug!(restaurant_id = %restaurant_id, "Review refresh returned nothing, keeping stored reviews");
                return;
            }
            Err(e) => {
                debug!(restaurant_id = %restaurant_id, error = %e, "Review refresh failed, keeping stored reviews");
                return;
            }
        };

        match self.replace_stored(restaurant_id, &fresh).await {
            Ok(removed) => info!(
                restaurant_id = %restaurant_id,
                removed,
                stored = fresh.len(),
                "Reconciled reviews"
            ),
            Err(e) => warn!(restaurant_id = %restaurant_id, error = %e, "Failed to reconcile reviews"),
        }
    }

    /// Store every record of `fresh`, then delete the restaurant's stored
    /// reviews that are not among them. Stale records are only removed once
    /// all fresh ones are written, so an interrupted refresh loses nothing.
    async fn replace_stored(&self, restaurant_id: RestaurantId, fresh: &[Value]) -> Result<usize, StoreError> {
        let db = self.store.acquire().await?;
        let mut fresh_keys = HashSet::new();
        for record in fresh {
            fresh_keys.insert(db.put(REVIEWS, record.clone()).await?);
        }

        let stale: Vec<Key> = db
            .entries(REVIEWS, None, None)
            .await?
            .into_iter()
            .filter(|(key, value)| {
                !fresh_keys.contains(key) && stored_restaurant_id(value) == Some(restaurant_id)
            })
            .map(|(key, _)| key)
            .collect();

        for key in &stale {
            db.delete(REVIEWS, key.clone()).await?;
        }
        Ok(stale.len())
    }
}

fn parse_reviews(records: Vec<Value>) -> Vec<Review> {
    records
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Review>(value) {
            Ok(review) => Some(review),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable review record");
                None
            }
        })
        .collect()
}

fn stored_restaurant_id(value: &Value) -> Option<RestaurantId> {
    value
        .get("restaurant_id")
        .and_then(|id| serde_json::from_value(id.clone()).ok())
}
