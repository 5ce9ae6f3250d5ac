//! Network access.
//!
//! [`Network`] is the fetch primitive everything else is written against.
//! [`HttpNetwork`] implements it over `reqwest`; the cache proxy implements
//! it too, so page-side code can issue intercepted fetches.

pub mod client;
pub mod error;
pub mod request;

pub use client::{fetch_ok, HttpNetwork, Network};
pub use error::NetworkError;
pub use request::{Method, Request, Response};
