//! The byte cache: captured HTTP responses, grouped in generations.
//!
//! Each app version reads and writes exactly one generation, named
//! `"<app-name>-<version>"`. A generation is never patched across versions;
//! activating a new version deletes the others wholesale.

pub mod storage;

pub use storage::{AddAllReport, Cache, CacheError, CacheKey, CacheStorage, CachedResponse};
