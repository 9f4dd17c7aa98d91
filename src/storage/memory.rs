//! In-process storage backend
//!
//! A `tokio::sync::RwLock` over a hash map, suitable for session-scoped
//! carts, tests and single-process deployments. State lives in this
//! process only and is NOT safely shared across processes; use the cache
//! or Postgres backend for that.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{check_version, CartStorage, StorageRecord};
use crate::domain::aggregates::cart::CartState;
use crate::domain::aggregates::item::CartItem;
use crate::domain::conditions::Condition;
use crate::Result;

#[derive(Default)]
pub struct MemoryStorage {
    records: RwLock<HashMap<(String, String), StorageRecord>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version-checked read-modify-write under the write lock.
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
        let mut records = self.records.write().await;
        let key = (identifier.to_string(), instance.to_string());
        match records.get_mut(&key) {
            Some(record) => {
                check_version(identifier, instance, expected, Some(record.version))?;
                apply(&mut record.state);
                record.version += 1;
                record.updated_at = Utc::now();
                Ok(record.version)
            }
            None => {
                check_version(identifier, instance, expected, None)?;
                let mut record = StorageRecord::new(identifier, instance, CartState::default());
                apply(&mut record.state);
                let version = record.version;
                records.insert(key, record);
                Ok(version)
            }
        }
    }
}

#[async_trait]
impl CartStorage for MemoryStorage {
    async fn load(&self, identifier: &str, instance: &str) -> Result<Option<StorageRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(identifier.to_string(), instance.to_string()))
            .cloned())
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
        let mut records = self.records.write().await;
        Ok(records
            .remove(&(identifier.to_string(), instance.to_string()))
            .is_some())
    }

    async fn forget_identifier(&self, identifier: &str) -> Result<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(id, _), _| id != identifier);
        Ok((before - records.len()) as u64)
    }

    async fn get_instances(&self, identifier: &str) -> Result<Vec<String>> {
        let records = self.records.read().await;
        let mut instances: Vec<String> = records
            .keys()
            .filter(|(id, _)| id == identifier)
            .map(|(_, instance)| instance.clone())
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
        let mut records = self.records.write().await;
        let old_key = (old_identifier.to_string(), instance.to_string());
        let new_key = (new_identifier.to_string(), instance.to_string());

        // single lock makes the destructive relabel atomic here
        let Some(mut record) = records.remove(&old_key) else {
            return Ok(false);
        };
        record.identifier = new_identifier.to_string();
        record.updated_at = Utc::now();
        records.insert(new_key, record);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CartError;

    #[tokio::test]
    async fn test_create_then_update_versions() {
        let storage = MemoryStorage::new();
        let item = CartItem::new("a", "A", 100, 1).unwrap();
        let v1 = storage
            .put_items("u1", "default", vec![item.clone()], None)
            .await
            .unwrap();
        assert_eq!(v1, 1);
        let v2 = storage
            .put_items("u1", "default", vec![item], Some(v1))
            .await
            .unwrap();
        assert_eq!(v2, 2);
        assert_eq!(storage.get_version("u1", "default").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let storage = MemoryStorage::new();
        storage
            .put_items("u1", "default", vec![], None)
            .await
            .unwrap();
        let err = storage
            .put_items("u1", "default", vec![], Some(99))
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::ConcurrencyConflict { .. }));
        // creating over an existing record conflicts too
        let err = storage
            .put_items("u1", "default", vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CartError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn test_swap_replaces_populated_destination() {
        let storage = MemoryStorage::new();
        storage
            .put_items("guest", "default", vec![CartItem::new("a", "A", 100, 1).unwrap()], None)
            .await
            .unwrap();
        storage
            .put_items("user", "default", vec![CartItem::new("b", "B", 100, 3).unwrap()], None)
            .await
            .unwrap();
        assert!(storage
            .swap_identifier("guest", "user", "default")
            .await
            .unwrap());
        let record = storage.load("user", "default").await.unwrap().unwrap();
        assert_eq!(record.state.items()[0].id(), "a");
    }

    #[tokio::test]
    async fn test_swap_without_source_touches_nothing() {
        let storage = MemoryStorage::new();
        storage
            .put_items("user", "default", vec![CartItem::new("b", "B", 100, 3).unwrap()], None)
            .await
            .unwrap();
        assert!(!storage
            .swap_identifier("ghost", "user", "default")
            .await
            .unwrap());
        let record = storage.load("user", "default").await.unwrap().unwrap();
        assert_eq!(record.state.items()[0].quantity(), 3);
    }

    #[tokio::test]
    async fn test_swap_replaces_empty_destination() {
        let storage = MemoryStorage::new();
        storage
            .put_items("guest", "default", vec![CartItem::new("a", "A", 100, 1).unwrap()], None)
            .await
            .unwrap();
        // destination exists but is empty
        storage.put_items("user", "default", vec![], None).await.unwrap();
        assert!(storage
            .swap_identifier("guest", "user", "default")
            .await
            .unwrap());
        assert!(!storage.has("guest", "default").await.unwrap());
        let record = storage.load("user", "default").await.unwrap().unwrap();
        assert_eq!(record.identifier, "user");
        assert_eq!(record.state.items().len(), 1);
    }

    #[tokio::test]
    async fn test_instances_and_forget_identifier() {
        let storage = MemoryStorage::new();
        storage.put_items("u1", "default", vec![], None).await.unwrap();
        storage.put_items("u1", "wishlist", vec![], None).await.unwrap();
        storage.put_items("u2", "default", vec![], None).await.unwrap();
        assert_eq!(
            storage.get_instances("u1").await.unwrap(),
            vec!["default".to_string(), "wishlist".to_string()]
        );
        assert_eq!(storage.forget_identifier("u1").await.unwrap(), 2);
        assert!(storage.get_instances("u1").await.unwrap().is_empty());
        assert!(storage.has("u2", "default").await.unwrap());
    }
}
