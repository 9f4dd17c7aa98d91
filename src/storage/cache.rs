//! Cache storage backend
//!
//! Represents each cart as one serialized value guarded by a generation
//! counter, the natural shape for key-value caches. [`CacheBackend`]
//! abstracts the actual cache client (compare-and-swap on the generation
//! is the only write primitive needed); [`LocalCache`] is the bundled
//! in-process implementation.
//!
//! Multi-key operations (`forget_identifier`, `swap_identifier`) are
//! best-effort sequences of single-key operations; a crash in between can
//! leave both keys populated. Use the Postgres backend where that window
//! is unacceptable.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{check_version, CartStorage, StorageRecord};
use crate::domain::aggregates::cart::CartState;
use crate::domain::aggregates::item::CartItem;
use crate::domain::conditions::Condition;
use crate::{CartError, Result};

/// Minimal cache client surface: versioned reads, compare-and-swap writes.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the payload and its generation counter.
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>>;

    /// Writes only if the stored generation still matches `expected`
    /// (`None` = the key must not exist). Returns the new generation, or
    /// `None` when the swap lost.
    async fn compare_and_put(
        &self,
        key: &str,
        payload: Vec<u8>,
        expected: Option<u64>,
    ) -> Result<Option<u64>>;

    async fn delete(&self, key: &str) -> Result<bool>;

    /// Keys starting with the prefix. Callers re-verify ownership from the
    /// payload, so over-matching is harmless.
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-process [`CacheBackend`] used in tests and single-node setups.
#[derive(Default)]
pub struct LocalCache {
    entries: RwLock<HashMap<String, (Vec<u8>, u64)>>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for LocalCache {
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, u64)>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn compare_and_put(
        &self,
        key: &str,
        payload: Vec<u8>,
        expected: Option<u64>,
    ) -> Result<Option<u64>> {
        let mut entries = self.entries.write().await;
        let current = entries.get(key).map(|(_, generation)| *generation);
        if current != expected {
            return Ok(None);
        }
        let next = current.unwrap_or(0) + 1;
        entries.insert(key.to_string(), (payload, next));
        Ok(Some(next))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

pub struct CacheStorage<B: CacheBackend> {
    backend: B,
}

impl<B: CacheBackend> CacheStorage<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn key(identifier: &str, instance: &str) -> String {
        format!("cart:{identifier}:{instance}")
    }

    async fn read(
        &self,
        identifier: &str,
        instance: &str,
    ) -> Result<Option<(StorageRecord, u64)>> {
        match self.backend.get(&Self::key(identifier, instance)).await? {
            None => Ok(None),
            Some((payload, generation)) => {
                let record: StorageRecord = serde_json::from_slice(&payload)?;
                Ok(Some((record, generation)))
            }
        }
    }

    /// Version-checked read-modify-write; the backend CAS catches races
    /// between our read and our write.
    async fn write_with<F>(
        &self,
        identifier: &str,
        instance: &str,
        expected: Option<u64>,
        apply: F,
    ) -> Result<u64>
    where
        F: FnOnce(&mut CartState),
    {
        let current = self.read(identifier, instance).await?;
        let (mut record, generation) = match current {
            Some((record, generation)) => {
                check_version(identifier, instance, expected, Some(record.version))?;
                (record, Some(generation))
            }
            None => {
                check_version(identifier, instance, expected, None)?;
                (
                    StorageRecord::new(identifier, instance, CartState::default()),
                    None,
                )
            }
        };

        apply(&mut record.state);
        if generation.is_some() {
            record.version += 1;
        }
        record.updated_at = Utc::now();

        let payload = serde_json::to_vec(&record)?;
        let written = self
            .backend
            .compare_and_put(&Self::key(identifier, instance), payload, generation)
            .await?;
        if written.is_none() {
            let found = self.get_version(identifier, instance).await?;
            return Err(CartError::ConcurrencyConflict {
                identifier: identifier.to_string(),
                instance: instance.to_string(),
                expected,
                found,
            });
        }
        Ok(record.version)
    }

    /// Records belonging to the identifier, re-verified from the payload
    /// so identifiers containing the key separator cannot cross-match.
    async fn records_for(&self, identifier: &str) -> Result<Vec<(String, StorageRecord)>> {
        let keys = self
            .backend
            .scan_prefix(&format!("cart:{identifier}:"))
            .await?;
        let mut records = Vec::new();
        for key in keys {
            if let Some((payload, _)) = self.backend.get(&key).await? {
                let record: StorageRecord = serde_json::from_slice(&payload)?;
                if record.identifier == identifier {
                    records.push((key, record));
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl<B: CacheBackend> CartStorage for CacheStorage<B> {
    async fn load(&self, identifier: &str, instance: &str) -> Result<Option<StorageRecord>> {
        Ok(self.read(identifier, instance).await?.map(|(r, _)| r))
    }

    async fn put_items(
        &self,
        identifier: &str,
        instance: &str,
        items: Vec<CartItem>,
        expected: Option<u64>,
    ) -> Result<u64> {
        self.write_with(identifier, instance, expected, |state| {
            state.set_items(items);
        })
        .await
    }

    async fn put_conditions(
        &self,
        identifier: &str,
        instance: &str,
        conditions: Vec<Condition>,
        expected: Option<u64>,
    ) -> Result<u64> {
        self.write_with(identifier, instance, expected, |state| {
            state.set_conditions(conditions);
        })
        .await
    }

    async fn put_both(
        &self,
        identifier: &str,
        instance: &str,
        items: Vec<CartItem>,
        conditions: Vec<Condition>,
        expected: Option<u64>,
    ) -> Result<u64> {
        self.write_with(identifier, instance, expected, |state| {
            state.set_items(items);
            state.set_conditions(conditions);
        })
        .await
    }

    async fn put_metadata(
        &self,
        identifier: &str,
        instance: &str,
        key: &str,
        value: Value,
        expected: Option<u64>,
    ) -> Result<u64> {
        self.write_with(identifier, instance, expected, |state| {
            state.set_metadata(key, value);
        })
        .await
    }

    async fn put_metadata_batch(
        &self,
        identifier: &str,
        instance: &str,
        metadata: BTreeMap<String, Value>,
        expected: Option<u64>,
    ) -> Result<u64> {
        self.write_with(identifier, instance, expected, |state| {
            state.set_metadata_map(metadata);
        })
        .await
    }

    async fn forget(&self, identifier: &str, instance: &str) -> Result<bool> {
        self.backend.delete(&Self::key(identifier, instance)).await
    }

    async fn forget_identifier(&self, identifier: &str) -> Result<u64> {
        let mut removed = 0;
        for (key, _) in self.records_for(identifier).await? {
            if self.backend.delete(&key).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn get_instances(&self, identifier: &str) -> Result<Vec<String>> {
        let mut instances: Vec<String> = self
            .records_for(identifier)
            .await?
            .into_iter()
            .map(|(_, record)| record.instance)
            .collect();
        instances.sort();
        Ok(instances)
    }

    async fn swap_identifier(
        &self,
        old_identifier: &str,
        new_identifier: &str,
        instance: &str,
    ) -> Result<bool> {
        let Some((mut record, _)) = self.read(old_identifier, instance).await? else {
            return Ok(false);
        };
        // the source record replaces the destination outright; the CAS on
        // the destination's generation catches a concurrent writer there
        let destination = self.read(new_identifier, instance).await?;
        let destination_generation = destination.as_ref().map(|(_, generation)| *generation);
        let destination_version = destination.as_ref().map(|(existing, _)| existing.version);

        record.identifier = new_identifier.to_string();
        record.updated_at = Utc::now();
        let payload = serde_json::to_vec(&record)?;
        let written = self
            .backend
            .compare_and_put(
                &Self::key(new_identifier, instance),
                payload,
                destination_generation,
            )
            .await?;
        if written.is_none() {
            let found = self.get_version(new_identifier, instance).await?;
            return Err(CartError::ConcurrencyConflict {
                identifier: new_identifier.to_string(),
                instance: instance.to_string(),
                expected: destination_version,
                found,
            });
        }
        // write-then-delete: a crash here leaves both keys populated
        self.backend
            .delete(&Self::key(old_identifier, instance))
            .await?;
        Ok(true)
    }
}
