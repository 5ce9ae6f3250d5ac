//! Data models for the restaurant reviews entities.
//!
//! - `RestaurantId`, `ReviewId`: identifiers normalised to integers
//! - `Restaurant`, `LatLng`: the list snapshot served by the API
//! - `Review`: one review, including the synthetic offline placeholder

pub mod id;
pub mod restaurant;
pub mod review;

pub use id::{RestaurantId, ReviewId};
pub use restaurant::{LatLng, Restaurant};
pub use review::Review;
