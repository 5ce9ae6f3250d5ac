//! Partition layout and the additive schema migrator.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::database::Database;
use super::StoreError;

/// Opaque values handed from the page to the worker.
pub const FILES: &str = "files";
/// The restaurant list snapshot.
pub const RESTAURANTS: &str = "restaurants";
/// Favorite markers, keyed by restaurant.
pub const FAVORITES: &str = "favorites";
/// Reserved for an outbox of review writes; nothing writes to it yet.
pub const REVIEW_QUEUE: &str = "review-queue";
/// Reviews, keyed by review id.
pub const REVIEWS: &str = "reviews";

/// Key of the single record in [`RESTAURANTS`].
pub const RESTAURANTS_KEY: &str = "restaurants";
/// Key in [`FILES`] under which the page records its lazy-load script choice.
pub const DYNAMIC_ASSET_KEY: &str = "lazy-load-src";

/// Tree holding the schema record, apart from the partitions.
const META_TREE: &str = "__meta";
const SCHEMA_KEY: &str = "schema";

/// How records in a partition get their key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum KeyConfig {
    /// The caller passes the key with every write.
    Explicit,
    /// The key is read from the stored value's `key_path` field.
    Intrinsic { key_path: String },
}

impl KeyConfig {
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            KeyConfig::Explicit => "explicit",
            KeyConfig::Intrinsic { .. } => "intrinsic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub name: String,
    pub key: KeyConfig,
}

impl PartitionSpec {
    pub fn explicit(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: KeyConfig::Explicit,
        }
    }

    pub fn intrinsic(name: impl Into<String>, key_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: KeyConfig::Intrinsic {
                key_path: key_path.into(),
            },
        }
    }
}

/// The partitions of the application database.
pub fn app_partitions() -> Vec<PartitionSpec> {
    vec![
        PartitionSpec::explicit(FILES),
        PartitionSpec::explicit(RESTAURANTS),
        PartitionSpec::intrinsic(FAVORITES, "restaurant_id"),
        PartitionSpec::explicit(REVIEW_QUEUE),
        PartitionSpec::intrinsic(REVIEWS, "id"),
    ]
}

/// The schema record: version and partition key configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SchemaFile {
    pub version: u32,
    pub partitions: Vec<PartitionSpec>,
}

/// Outcome of comparing the stored schema with the requested one.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct MigrationPlan {
    pub schema: SchemaFile,
    pub created: Vec<String>,
    /// Partitions whose stored key configuration differs from the request.
    pub conflicts: Vec<String>,
}

impl MigrationPlan {
    pub fn changes_schema(&self, stored: Option<&SchemaFile>) -> bool {
        stored != Some(&self.schema)
    }
}

/// Compute what opening at `version` with `specs` does to `stored`.
/// Existing partitions are never dropped, renamed or reconfigured.
pub(crate) fn plan_migration(
    stored: Option<&SchemaFile>,
    version: u32,
    specs: &[PartitionSpec],
) -> Result<MigrationPlan, StoreError> {
    let mut schema = match stored {
        Some(stored) if stored.version > version => {
            return Err(StoreError::Unavailable(format!(
                "stored version {} is newer than requested version {}",
                stored.version, version
            )));
        }
        Some(stored) => stored.clone(),
        None => SchemaFile {
            version: 0,
            partitions: Vec::new(),
        },
    };

    let upgrading = schema.version < version;
    let mut created = Vec::new();
    let mut conflicts = Vec::new();

    for spec in specs {
        match schema.partitions.iter().find(|p| p.name == spec.name) {
            Some(existing) if existing.key != spec.key => conflicts.push(spec.name.clone()),
            Some(_) => {}
            None if upgrading => {
                schema.partitions.push(spec.clone());
                created.push(spec.name.clone());
            }
            None => {}
        }
    }
    schema.version = version;

    Ok(MigrationPlan {
        schema,
        created,
        conflicts,
    })
}

/// Opens databases, upgrading their schema on the way.
pub struct SchemaMigrator;

impl SchemaMigrator {
    /// Open the database `name` under `root` at `version`.
    ///
    /// Any failure to read or write the schema is reported as
    /// [`StoreError::Unavailable`].
    pub async fn open(
        root: &Path,
        name: &str,
        version: u32,
        specs: &[PartitionSpec],
    ) -> Result<Database, StoreError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(StoreError::Unavailable(format!(
                "invalid database name {:?}",
                name
            )));
        }
        if let Some(spec) = specs.iter().find(|s| s.name.starts_with("__")) {
            return Err(StoreError::Unavailable(format!(
                "reserved partition name {:?}",
                spec.name
            )));
        }
        let unavailable = |e: StoreError| StoreError::Unavailable(e.to_string());

        let db = sled::Config::new()
            .path(root.join(name))
            .flush_every_ms(None)
            .open()
            .map_err(|e| unavailable(e.into()))?;
        let meta = db.open_tree(META_TREE).map_err(|e| unavailable(e.into()))?;
        let stored = read_schema(&meta).map_err(unavailable)?;

        let plan = plan_migration(stored.as_ref(), version, specs)?;
        if plan.changes_schema(stored.as_ref()) {
            write_schema(&meta, &plan.schema).await.map_err(unavailable)?;
            info!(
                database = name,
                from = stored.as_ref().map(|s| s.version).unwrap_or(0),
                to = version,
                created = ?plan.created,
                "Migrated local database schema"
            );
        } else {
            debug!(database = name, version, "Local database schema is current");
        }

        for partition in &plan.conflicts {
            warn!(database = name, partition = %partition, "Partition key configuration conflict");
        }

        let conflicts: HashSet<String> = plan.conflicts.into_iter().collect();
        Database::load(db, plan.schema, conflicts).map_err(unavailable)
    }
}

fn read_schema(meta: &sled::Tree) -> Result<Option<SchemaFile>, StoreError> {
    match meta.get(SCHEMA_KEY)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

async fn write_schema(meta: &sled::Tree, schema: &SchemaFile) -> Result<(), StoreError> {
    meta.insert(SCHEMA_KEY, serde_json::to_vec(schema)?)?;
    meta.flush_async().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_creates_every_partition() {
        let plan = plan_migration(None, 4, &app_partitions()).unwrap();
        assert_eq!(plan.schema.version, 4);
        assert_eq!(plan.created.len(), 5);
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn test_same_version_is_a_no_op() {
        let first = plan_migration(None, 4, &app_partitions()).unwrap();
        let second = plan_migration(Some(&first.schema), 4, &app_partitions()).unwrap();
        assert!(second.created.is_empty());
        assert!(!second.changes_schema(Some(&first.schema)));
    }

    #[test]
    fn test_upgrade_only_adds_missing_partitions() {
        let stored = SchemaFile {
            version: 3,
            partitions: vec![
                PartitionSpec::explicit(FILES),
                PartitionSpec::explicit("legacy"),
            ],
        };
        let plan = plan_migration(Some(&stored), 4, &app_partitions()).unwrap();

        assert_eq!(plan.created, vec![RESTAURANTS, FAVORITES, REVIEW_QUEUE, REVIEWS]);
        assert!(plan.schema.partitions.iter().any(|p| p.name == "legacy"));
    }

    #[test]
    fn test_key_config_conflict_is_reported_not_fixed() {
        let stored = SchemaFile {
            version: 3,
            partitions: vec![PartitionSpec::explicit(REVIEWS)],
        };
        let plan = plan_migration(Some(&stored), 4, &app_partitions()).unwrap();

        assert_eq!(plan.conflicts, vec![REVIEWS.to_string()]);
        let reviews = plan.schema.partitions.iter().find(|p| p.name == REVIEWS).unwrap();
        assert_eq!(reviews.key, KeyConfig::Explicit);
    }

    #[test]
    fn test_downgrade_is_refused() {
        let stored = SchemaFile {
            version: 5,
            partitions: vec![],
        };
        let err = plan_migration(Some(&stored), 4, &app_partitions()).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_open_twice_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let db = SchemaMigrator::open(dir.path(), "reviews-db", 4, &app_partitions())
            .await
            .unwrap();
        db.set(FILES, DYNAMIC_ASSET_KEY, serde_json::json!("/lazy.js"))
            .await
            .unwrap();
        drop(db);

        let reopened = SchemaMigrator::open(dir.path(), "reviews-db", 4, &app_partitions())
            .await
            .unwrap();
        assert_eq!(
            reopened.get(FILES, DYNAMIC_ASSET_KEY).await.unwrap(),
            Some(serde_json::json!("/lazy.js"))
        );
        assert_eq!(reopened.keys(FILES).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_open_rejects_bad_name() {
        let dir = tempfile::tempdir().unwrap();
        let err = SchemaMigrator::open(dir.path(), "../escape", 1, &app_partitions())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_open_rejects_reserved_partition_name() {
        let dir = tempfile::tempdir().unwrap();
        let result = SchemaMigrator::open(dir.path(), "db", 1, &[PartitionSpec::explicit("__meta")]).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_downgrade_on_disk_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        drop(SchemaMigrator::open(dir.path(), "db", 4, &app_partitions()).await.unwrap());

        let result = SchemaMigrator::open(dir.path(), "db", 3, &app_partitions()).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
