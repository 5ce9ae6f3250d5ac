//! An opened database: one sled tree of ordered key/value records per
//! partition.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::key::{Key, KeyRange};
use super::schema::{KeyConfig, PartitionSpec, SchemaFile};
use super::StoreError;

struct Partition {
    spec: PartitionSpec,
    tree: sled::Tree,
}

/// A database opened by [`super::SchemaMigrator`].
///
/// Every operation is atomic for a single key and flushed before it
/// returns. There are no multi-key transactions: concurrent writers to the
/// same key race, last write wins.
pub struct Database {
    db: sled::Db,
    version: u32,
    partitions: HashMap<String, Partition>,
    conflicts: HashSet<String>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("version", &self.version)
            .field("partitions", &self.partition_names())
            .field("conflicts", &self.conflicts)
            .finish()
    }
}

impl Database {
    pub(crate) fn load(db: sled::Db, schema: SchemaFile, conflicts: HashSet<String>) -> Result<Self, StoreError> {
        let mut partitions = HashMap::new();
        for spec in schema.partitions {
            let tree = db.open_tree(spec.name.as_bytes())?;
            debug!(partition = %spec.name, records = tree.len(), "Opened partition");
            partitions.insert(spec.name.clone(), Partition { spec, tree });
        }

        Ok(Self {
            db,
            version: schema.version,
            partitions,
            conflicts,
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Names of the partitions that can be used.
    pub fn partition_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .partitions
            .keys()
            .filter(|name| !self.conflicts.contains(*name))
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names
    }

    fn partition(&self, name: &str) -> Result<&Partition, StoreError> {
        if self.conflicts.contains(name) {
            return Err(StoreError::SchemaConflict {
                partition: name.to_string(),
            });
        }
        self.partitions
            .get(name)
            .ok_or_else(|| StoreError::UnknownPartition(name.to_string()))
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }

    pub async fn get(&self, partition: &str, key: impl Into<Key>) -> Result<Option<Value>, StoreError> {
        let partition = self.partition(partition)?;
        match partition.tree.get(key.into().to_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Records in key order, optionally restricted to `range`, at most `limit`.
    pub async fn entries(
        &self,
        partition: &str,
        range: Option<&KeyRange>,
        limit: Option<usize>,
    ) -> Result<Vec<(Key, Value)>, StoreError> {
        let name = partition;
        let partition = self.partition(name)?;
        let iter = match range {
            Some(range) if range.is_empty() => return Ok(Vec::new()),
            Some(range) => partition.tree.range(range.byte_bounds()),
            None => partition.tree.iter(),
        };

        let mut records = Vec::new();
        for item in iter.take(limit.unwrap_or(usize::MAX)) {
            let (raw_key, raw_value) = item?;
            let Some(key) = Key::from_bytes(&raw_key) else {
                warn!(partition = name, "Skipping record with an undecodable key");
                continue;
            };
            records.push((key, serde_json::from_slice(&raw_value)?));
        }
        Ok(records)
    }

    pub async fn get_all(
        &self,
        partition: &str,
        range: Option<&KeyRange>,
        limit: Option<usize>,
    ) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .entries(partition, range, limit)
            .await?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Write `value` under `key`. Only valid on explicit-key partitions.
    pub async fn set(&self, partition: &str, key: impl Into<Key>, value: Value) -> Result<(), StoreError> {
        let name = partition;
        let partition = self.partition(name)?;
        if partition.spec.key != KeyConfig::Explicit {
            return Err(StoreError::KeyConfigMismatch {
                partition: name.to_string(),
                expected: partition.spec.key.describe(),
            });
        }
        partition
            .tree
            .insert(key.into().to_bytes(), serde_json::to_vec(&value)?)?;
        self.flush().await
    }

    /// Write `value` under the key found in its own key-path field. Only valid
    /// on intrinsic-key partitions. Returns the derived key.
    pub async fn put(&self, partition: &str, value: Value) -> Result<Key, StoreError> {
        let name = partition;
        let partition = self.partition(name)?;
        let key_path = match &partition.spec.key {
            KeyConfig::Intrinsic { key_path } => key_path,
            KeyConfig::Explicit => {
                return Err(StoreError::KeyConfigMismatch {
                    partition: name.to_string(),
                    expected: "explicit",
                })
            }
        };
        let key = value
            .get(key_path)
            .and_then(Key::from_value)
            .ok_or_else(|| StoreError::MissingKey {
                partition: name.to_string(),
                key_path: key_path.clone(),
            })?;

        partition.tree.insert(key.to_bytes(), serde_json::to_vec(&value)?)?;
        self.flush().await?;
        Ok(key)
    }

    /// Remove `key`. Returns whether a record existed.
    pub async fn delete(&self, partition: &str, key: impl Into<Key>) -> Result<bool, StoreError> {
        let partition = self.partition(partition)?;
        let existed = partition.tree.remove(key.into().to_bytes())?.is_some();
        if existed {
            self.flush().await?;
        }
        Ok(existed)
    }

    pub async fn keys(&self, partition: &str) -> Result<Vec<Key>, StoreError> {
        let partition = self.partition(partition)?;
        let mut keys = Vec::new();
        for raw_key in partition.tree.iter().keys() {
            if let Some(key) = Key::from_bytes(&raw_key?) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    pub async fn clear(&self, partition: &str) -> Result<(), StoreError> {
        let partition = self.partition(partition)?;
        partition.tree.clear()?;
        self.flush().await
    }

    // ===== Typed helpers =====

    pub async fn get_as<T: DeserializeOwned>(
        &self,
        partition: &str,
        key: impl Into<Key>,
    ) -> Result<Option<T>, StoreError> {
        match self.get(partition, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn set_as<T: Serialize + ?Sized>(
        &self,
        partition: &str,
        key: impl Into<Key>,
        value: &T,
    ) -> Result<(), StoreError> {
        self.set(partition, key, serde_json::to_value(value)?).await
    }

    pub async fn put_as<T: Serialize + ?Sized>(&self, partition: &str, value: &T) -> Result<Key, StoreError> {
        self.put(partition, serde_json::to_value(value)?).await
    }
}
