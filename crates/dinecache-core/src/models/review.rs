//! Review records as served by the `/reviews/?restaurant_id=<id>` endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::loose_opt_i64;
use super::{RestaurantId, ReviewId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    #[serde(default)]
    pub id: Option<ReviewId>,
    pub restaurant_id: RestaurantId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "loose_opt_i64")]
    pub rating: Option<i64>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(
        rename = "createdAt",
        default,
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        rename = "updatedAt",
        default,
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Review {
    /// Stand-in record returned when no review could be loaded at all.
    /// Only the restaurant and the message are set.
    pub fn placeholder(restaurant_id: RestaurantId, message: impl Into<String>) -> Self {
        Self {
            id: None,
            restaurant_id,
            name: None,
            rating: None,
            comments: Some(message.into()),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id.is_none() && self.name.is_none() && self.rating.is_none()
    }

    pub fn belongs_to(&self, restaurant_id: RestaurantId) -> bool {
        self.restaurant_id == restaurant_id
    }
}
