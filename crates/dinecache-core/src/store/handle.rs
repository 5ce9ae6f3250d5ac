//! The process-wide, lazily opened database handle.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::warn;

use super::schema::{app_partitions, PartitionSpec, SchemaMigrator};
use super::{Database, StoreError};
use crate::config::Config;

struct HandleInner {
    root: PathBuf,
    name: String,
    version: u32,
    specs: Vec<PartitionSpec>,
    opened: OnceCell<Result<Arc<Database>, StoreError>>,
}

/// Cheap to clone; every clone shares one open attempt and one database.
///
/// The database is opened (and migrated) on the first [`acquire`](Self::acquire).
/// The outcome, success or failure, is kept for the lifetime of the handle.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<HandleInner>,
}

impl StoreHandle {
    pub fn new(root: PathBuf, name: impl Into<String>, version: u32, specs: Vec<PartitionSpec>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                root,
                name: name.into(),
                version,
                specs,
                opened: OnceCell::new(),
            }),
        }
    }

    /// Handle to the application database described by `config`.
    pub fn for_app(config: &Config, data_dir: PathBuf) -> Self {
        Self::new(data_dir, config.db_name.clone(), config.db_version, app_partitions())
    }

    /// A handle whose database can never be opened, e.g. when local storage
    /// is disabled. Every acquire fails with [`StoreError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let error = StoreError::Unavailable(reason.into());
        Self {
            inner: Arc::new(HandleInner {
                root: PathBuf::new(),
                name: String::new(),
                version: 0,
                specs: Vec::new(),
                opened: OnceCell::new_with(Some(Err(error))),
            }),
        }
    }

    /// The opened database, opening it on first use.
    pub async fn acquire(&self) -> Result<Arc<Database>, StoreError> {
        let inner = &self.inner;
        inner
            .opened
            .get_or_init(|| async {
                SchemaMigrator::open(&inner.root, &inner.name, inner.version, &inner.specs)
                    .await
                    .map(Arc::new)
                    .map_err(|e| {
                        warn!(database = %inner.name, error = %e, "Local database unavailable, continuing network-only");
                        e
                    })
            })
            .await
            .clone()
    }
}
