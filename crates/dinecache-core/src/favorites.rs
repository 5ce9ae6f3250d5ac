//! Optimistic favorite toggles.
//!
//! The local marker in the `favorites` partition is what the UI shows. A
//! toggle writes (or deletes) it first, then fires one server update in the
//! background. The server update is best-effort: it is not retried, not
//! queued, and its failure is never written back to the local marker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::RestaurantId;
use crate::net::{Method, Network, NetworkError, Request};
use crate::store::{StoreError, StoreHandle, FAVORITES};

/// Presence of a marker means the restaurant is a favorite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteMarker {
    pub restaurant_id: RestaurantId,
    pub favorited_at: DateTime<Utc>,
}

/// What happened to the server update of a toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Confirmed,
    Rejected { status: u16 },
    Failed(String),
}

/// Handle on the background server update of one toggle. Dropping it does
/// not cancel the update.
#[derive(Debug)]
pub struct ServerSync(JoinHandle<SyncOutcome>);

impl ServerSync {
    pub async fn outcome(self) -> SyncOutcome {
        match self.0.await {
            Ok(outcome) => outcome,
            Err(e) => SyncOutcome::Failed(e.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct FavoriteSync {
    store: StoreHandle,
    network: Arc<dyn Network>,
    api_base: Url,
}

impl FavoriteSync {
    /// `network` is normally the cache proxy; update requests pass through it
    /// untouched.
    pub fn new(store: StoreHandle, network: Arc<dyn Network>, api_base: Url) -> Self {
        Self {
            store,
            network,
            api_base,
        }
    }

    /// `PUT <api>/restaurants/<id>/?is_favorite=<bool>`
    pub fn update_url(&self, restaurant_id: RestaurantId, favorited: bool) -> Result<Url, NetworkError> {
        let mut url = self
            .api_base
            .join(&format!("restaurants/{}/", restaurant_id))
            .map_err(|e| NetworkError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("is_favorite", if favorited { "true" } else { "false" });
        Ok(url)
    }

    /// Record the user's decision locally, then tell the server in the
    /// background.
    pub async fn toggle(&self, restaurant_id: RestaurantId, now_favorited: bool) -> ServerSync {
        if let Err(e) = self.apply_local(restaurant_id, now_favorited).await {
            warn!(restaurant_id = %restaurant_id, error = %e, "Could not record favorite locally");
        }

        let request = self
            .update_url(restaurant_id, now_favorited)
            .map(|url| Request::from_url(Method::PUT, url));
        let network = self.network.clone();

        ServerSync(tokio::spawn(async move {
            let request = match request {
                Ok(request) => request,
                Err(e) => return SyncOutcome::Failed(e.to_string()),
            };
            match network.fetch(request).await {
                Ok(response) if response.is_success() => {
                    info!(restaurant_id = %restaurant_id, favorited = now_favorited, "Favorite synced");
                    SyncOutcome::Confirmed
                }
                Ok(response) => {
                    warn!(restaurant_id = %restaurant_id, status = response.status, "Server rejected favorite update");
                    SyncOutcome::Rejected {
                        status: response.status,
                    }
                }
                Err(e) => {
                    warn!(restaurant_id = %restaurant_id, error = %e, "Favorite update not delivered");
                    SyncOutcome::Failed(e.to_string())
                }
            }
        }))
    }

    async fn apply_local(&self, restaurant_id: RestaurantId, favorited: bool) -> Result<(), StoreError> {
        let db = self.store.acquire().await?;
        if favorited {
            let marker = FavoriteMarker {
                restaurant_id,
                favorited_at: Utc::now(),
            };
            db.put_as(FAVORITES, &marker).await?;
        } else {
            db.delete(FAVORITES, restaurant_id).await?;
        }
        debug!(restaurant_id = %restaurant_id, favorited, "Favorite recorded locally");
        Ok(())
    }

    /// Whether a marker exists. An unavailable store reads as "not favorited".
    pub async fn is_favorite(&self, restaurant_id: RestaurantId) -> bool {
        let result = match self.store.acquire().await {
            Ok(db) => db.get(FAVORITES, restaurant_id).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(marker) => marker.is_some(),
            Err(e) => {
                debug!(restaurant_id = %restaurant_id, error = %e, "Favorite state unavailable");
                false
            }
        }
    }

    /// All favorited restaurants, in id order.
    pub async fn favorites(&self) -> Result<Vec<RestaurantId>, StoreError> {
        let db = self.store.acquire().await?;
        Ok(db
            .keys(FAVORITES)
            .await?
            .into_iter()
            .filter_map(|key| key.as_int().map(RestaurantId))
            .collect())
    }
}
