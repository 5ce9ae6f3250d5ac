//! Page-side read API for restaurant data.
//!
//! Requests go through the network handed in, normally the cache proxy, so
//! they are intercepted like any page fetch. The restaurant list is also
//! kept as one snapshot in the local database: when a snapshot exists it is
//! returned at once and refreshed in the background.

use std::sync::Arc;

use reqwest::Url;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::fetched::{Fetched, Refreshes};
use crate::models::{Restaurant, RestaurantId, Review};
use crate::net::client::ACCEPT_JSON;
use crate::net::{Method, Network, NetworkError, Request};
use crate::store::{StoreHandle, RESTAURANTS, RESTAURANTS_KEY};

/// Filter value that matches every cuisine or neighborhood.
pub const ALL: &str = "all";

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Request failed. Returned status of {status} {reason}")]
    RequestFailed { status: u16, reason: String },

    #[error("Restaurant does not exist: {0}")]
    NotFound(RestaurantId),

    #[error("Invalid response data: {0}")]
    Parse(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

#[derive(Clone)]
pub struct DataClient {
    store: StoreHandle,
    network: Arc<dyn Network>,
    api_base: Url,
    refreshes: Refreshes,
}

impl DataClient {
    pub fn new(store: StoreHandle, network: Arc<dyn Network>, api_base: Url) -> Self {
        Self {
            store,
            network,
            api_base,
            refreshes: Refreshes::default(),
        }
    }

    /// Track snapshot refreshes in `refreshes` instead of a private tracker.
    pub fn with_refreshes(mut self, refreshes: Refreshes) -> Self {
        self.refreshes = refreshes;
        self
    }

    pub fn refreshes(&self) -> &Refreshes {
        &self.refreshes
    }

    fn endpoint(&self, path: &str) -> Result<Url, DataError> {
        self.api_base
            .join(path)
            .map_err(|e| NetworkError::InvalidUrl(e.to_string()).into())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, DataError> {
        let request = Request::from_url(Method::GET, url).with_header(ACCEPT_JSON.0, ACCEPT_JSON.1);
        let response = self.network.fetch(request).await?;
        if !response.is_success() {
            return Err(DataError::RequestFailed {
                status: response.status,
                reason: response.status_text.clone(),
            });
        }
        response.parse_json().map_err(|e| DataError::Parse(e.to_string()))
    }

    // ===== Restaurants =====

    /// All restaurants: the stored snapshot when there is one (refreshed in
    /// the background), otherwise a network fetch that becomes the snapshot.
    pub async fn fetch_restaurants(&self) -> Result<Fetched<Vec<Restaurant>>, DataError> {
        if let Some(local) = self.local_restaurants().await {
            let this = self.clone();
            let refresh = self.refreshes.spawn(async move {
                match this.fetch_remote_restaurants().await {
                    Ok(restaurants) => this.store_snapshot(&restaurants).await,
                    Err(e) => debug!(error = %e, "Restaurant refresh failed, keeping snapshot"),
                }
            });
            return Ok(Fetched::local(local, refresh));
        }

        let restaurants = self.fetch_remote_restaurants().await?;
        self.store_snapshot(&restaurants).await;
        Ok(Fetched::network(restaurants))
    }

    async fn fetch_remote_restaurants(&self) -> Result<Vec<Restaurant>, DataError> {
        let url = self.endpoint("restaurants/")?;
        self.get_json(url).await
    }

    async fn local_restaurants(&self) -> Option<Vec<Restaurant>> {
        let db = self.store.acquire().await.ok()?;
        match db.get_as::<Vec<Restaurant>>(RESTAURANTS, RESTAURANTS_KEY).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable restaurant snapshot");
                None
            }
        }
    }

    async fn store_snapshot(&self, restaurants: &[Restaurant]) {
        let result = match self.store.acquire().await {
            Ok(db) => db.set_as(RESTAURANTS, RESTAURANTS_KEY, restaurants).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => debug!(count = restaurants.len(), "Stored restaurant snapshot"),
            Err(e) => warn!(error = %e, "Failed to store restaurant snapshot"),
        }
    }

    /// One restaurant with its reviews attached.
    pub async fn fetch_restaurant_by_id(&self, id: RestaurantId) -> Result<Restaurant, DataError> {
        let restaurants = self.fetch_restaurants().await?.into_data();
        let mut restaurant = restaurants
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(DataError::NotFound(id))?;
        restaurant.reviews = Some(self.fetch_reviews(id).await?);
        Ok(restaurant)
    }

    /// Reviews through the reviews endpoint.
    pub async fn fetch_reviews(&self, id: RestaurantId) -> Result<Vec<Review>, DataError> {
        let mut url = self.endpoint("reviews/")?;
        url.query_pairs_mut().append_pair("restaurant_id", &id.to_string());
        self.get_json(url).await
    }

    pub async fn by_cuisine(&self, cuisine: &str) -> Result<Vec<Restaurant>, DataError> {
        let restaurants = self.fetch_restaurants().await?.into_data();
        Ok(restaurants.into_iter().filter(|r| r.cuisine_type == cuisine).collect())
    }

    pub async fn by_neighborhood(&self, neighborhood: &str) -> Result<Vec<Restaurant>, DataError> {
        let restaurants = self.fetch_restaurants().await?.into_data();
        Ok(restaurants
            .into_iter()
            .filter(|r| r.neighborhood == neighborhood)
            .collect())
    }

    /// Either filter may be [`ALL`].
    pub async fn by_cuisine_and_neighborhood(
        &self,
        cuisine: &str,
        neighborhood: &str,
    ) -> Result<Vec<Restaurant>, DataError> {
        let restaurants = self.fetch_restaurants().await?.into_data();
        Ok(filter_restaurants(restaurants, cuisine, neighborhood))
    }

    pub async fn neighborhoods(&self) -> Result<Vec<String>, DataError> {
        let restaurants = self.fetch_restaurants().await?.into_data();
        Ok(unique_values(&restaurants, |r| &r.neighborhood))
    }

    pub async fn cuisines(&self) -> Result<Vec<String>, DataError> {
        let restaurants = self.fetch_restaurants().await?.into_data();
        Ok(unique_values(&restaurants, |r| &r.cuisine_type))
    }

    // ===== URLs =====

    pub fn url_for_restaurant(restaurant: &Restaurant) -> String {
        format!("./restaurant.html?id={}", restaurant.id)
    }

    /// Every restaurant has a photo named after its id.
    pub fn image_url_for_restaurant(restaurant: &Restaurant) -> String {
        format!("/img/{}.jpg", restaurant.id)
    }
}

pub fn filter_restaurants(restaurants: Vec<Restaurant>, cuisine: &str, neighborhood: &str) -> Vec<Restaurant> {
    restaurants
        .into_iter()
        .filter(|r| cuisine == ALL || r.cuisine_type == cuisine)
        .filter(|r| neighborhood == ALL || r.neighborhood == neighborhood)
        .collect()
}

/// Distinct values in first-seen order.
fn unique_values(restaurants: &[Restaurant], field: impl Fn(&Restaurant) -> &String) -> Vec<String> {
    let mut values: Vec<String> = Vec::new();
    for restaurant in restaurants {
        let value = field(restaurant);
        if !values.contains(value) {
            values.push(value.clone());
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetched::Source;
    use crate::net::Response;
    use crate::store::app_partitions;
    use crate::test_support::MockNetwork;
    use serde_json::{json, Value};

    const API: &str = "http://localhost:1337/";
    const LIST: &str = "http://localhost:1337/restaurants/";

    fn restaurant(id: i64, cuisine: &str, neighborhood: &str) -> Value {
        json!({
            "id": id,
            "name": format!("Restaurant {}", id),
            "cuisine_type": cuisine,
            "neighborhood": neighborhood,
            "address": "1 Main St",
            "latlng": {"lat": 40.7, "lng": -73.9}
        })
    }

    fn sample() -> Value {
        json!([
            restaurant(1, "Asian", "Manhattan"),
            restaurant(2, "Pizza", "Brooklyn"),
            restaurant(3, "Asian", "Queens"),
            restaurant(4, "Pizza", "Manhattan"),
        ])
    }

    fn client(dir: &std::path::Path, network: Arc<MockNetwork>) -> (DataClient, StoreHandle) {
        let store = StoreHandle::new(dir.to_path_buf(), "db", 1, app_partitions());
        (DataClient::new(store.clone(), network, Url::parse(API).unwrap()), store)
    }

    #[tokio::test]
    async fn test_first_fetch_goes_to_network_and_stores_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        network.respond_json(LIST, &sample());
        let (client, store) = client(dir.path(), network);

        let fetched = client.fetch_restaurants().await.unwrap();
        assert_eq!(fetched.source, Source::Network);
        assert_eq!(fetched.data.len(), 4);

        let db = store.acquire().await.unwrap();
        let snapshot: Vec<Restaurant> = db.get_as(RESTAURANTS, RESTAURANTS_KEY).await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 4);
    }

    #[tokio::test]
    async fn test_snapshot_served_then_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        let (client, store) = client(dir.path(), network.clone());
        store
            .acquire()
            .await
            .unwrap()
            .set(RESTAURANTS, RESTAURANTS_KEY, json!([restaurant(1, "Asian", "Manhattan")]))
            .await
            .unwrap();
        network.respond_json(LIST, &sample());

        let fetched = client.fetch_restaurants().await.unwrap();
        assert_eq!(fetched.source, Source::Local);
        assert_eq!(fetched.settle().await.len(), 1);

        let again = client.fetch_restaurants().await.unwrap().into_data();
        assert_eq!(again.len(), 4);
    }

    #[tokio::test]
    async fn test_dropped_snapshot_refresh_finishes_on_drain() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        let (client, store) = client(dir.path(), network.clone());
        let db = store.acquire().await.unwrap();
        db.set(RESTAURANTS, RESTAURANTS_KEY, json!([restaurant(1, "Asian", "Manhattan")]))
            .await
            .unwrap();
        network.respond_json(LIST, &sample());

        let served = client.fetch_restaurants().await.unwrap().into_data();
        assert_eq!(served.len(), 1);

        client.refreshes().drain().await;
        let snapshot: Vec<Restaurant> = db.get_as(RESTAURANTS, RESTAURANTS_KEY).await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 4);
    }

    #[tokio::test]
    async fn test_server_error_is_descriptive() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        network.respond(LIST, Response::text(500, "Internal Server Error"));
        let (client, _store) = client(dir.path(), network);

        let err = client.fetch_restaurants().await.unwrap_err();
        assert!(matches!(err, DataError::RequestFailed { status: 500, .. }));
        assert!(err.to_string().starts_with("Request failed. Returned status of 500"));
    }

    #[tokio::test]
    async fn test_restaurant_by_id_attaches_reviews() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        network.respond_json(LIST, &sample());
        network.respond_json(
            "http://localhost:1337/reviews/?restaurant_id=3",
            &json!([{"id": 1, "restaurant_id": "3", "name": "A", "rating": 4, "comments": "ok"}]),
        );
        let (client, _store) = client(dir.path(), network);

        let restaurant = client.fetch_restaurant_by_id(RestaurantId(3)).await.unwrap();
        assert_eq!(restaurant.reviews.unwrap().len(), 1);

        let missing = client.fetch_restaurant_by_id(RestaurantId(99)).await.unwrap_err();
        assert!(matches!(missing, DataError::NotFound(RestaurantId(99))));
    }

    #[tokio::test]
    async fn test_malformed_list_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        network.respond(LIST, Response::new(200, "<html>not json</html>"));
        let (client, _store) = client(dir.path(), network);

        assert!(matches!(client.fetch_restaurants().await, Err(DataError::Parse(_))));
    }

    #[tokio::test]
    async fn test_filters_and_unique_values() {
        let dir = tempfile::tempdir().unwrap();
        let network = MockNetwork::new();
        network.respond_json(LIST, &sample());
        let (client, _store) = client(dir.path(), network);

        assert_eq!(client.by_cuisine("Asian").await.unwrap().len(), 2);
        assert_eq!(client.by_neighborhood("Manhattan").await.unwrap().len(), 2);
        assert_eq!(
            client.by_cuisine_and_neighborhood("Pizza", "Manhattan").await.unwrap().len(),
            1
        );
        assert_eq!(client.by_cuisine_and_neighborhood(ALL, ALL).await.unwrap().len(), 4);
        assert_eq!(
            client.neighborhoods().await.unwrap(),
            vec!["Manhattan", "Brooklyn", "Queens"]
        );
        assert_eq!(client.cuisines().await.unwrap(), vec!["Asian", "Pizza"]);
    }

    #[test]
    fn test_urls() {
        let restaurant: Restaurant = serde_json::from_value(restaurant(5, "Asian", "Queens")).unwrap();
        assert_eq!(DataClient::url_for_restaurant(&restaurant), "./restaurant.html?id=5");
        assert_eq!(DataClient::image_url_for_restaurant(&restaurant), "/img/5.jpg");
    }
}
