//! Restaurant records as served by the `/restaurants/` endpoint.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{RestaurantId, Review};

/// Geographic position of a restaurant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// A restaurant. `reviews` is only filled in by the detail fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: RestaurantId,
    pub name: String,
    #[serde(default)]
    pub neighborhood: String,
    #[serde(default)]
    pub cuisine_type: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub photograph: Option<String>,
    #[serde(default)]
    pub latlng: Option<LatLng>,
    /// Day name to opening hours, e.g. `"Monday" -> "5:30 pm - 11:00 pm"`.
    #[serde(default)]
    pub operating_hours: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviews: Option<Vec<Review>>,
}
