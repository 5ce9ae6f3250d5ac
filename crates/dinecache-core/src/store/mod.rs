//! Versioned, partitioned local database.
//!
//! A database is a sled directory with one tree per partition plus a meta
//! tree holding the schema record (version and partition key
//! configuration). The application opens it once through a [`StoreHandle`];
//! opening runs the [`SchemaMigrator`], which only ever adds partitions.
//!
//! Partitions used by the app:
//! - `files`: opaque values handed over by the page (dynamic asset choice)
//! - `restaurants`: the restaurant list snapshot under the key `"restaurants"`
//! - `favorites`: one marker per favorited restaurant
//! - `review-queue`: reserved for pending outbound review writes
//! - `reviews`: review records keyed by their own `id`

pub mod database;
pub mod error;
pub mod handle;
pub mod key;
pub mod schema;

pub use database::Database;
pub use error::StoreError;
pub use handle::StoreHandle;
pub use key::{Key, KeyRange};
pub use schema::{
    app_partitions, KeyConfig, PartitionSpec, SchemaMigrator, DYNAMIC_ASSET_KEY, FAVORITES, FILES,
    RESTAURANTS, RESTAURANTS_KEY, REVIEWS, REVIEW_QUEUE,
};
