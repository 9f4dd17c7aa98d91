//! Storage abstraction
//!
//! One trait, several physical representations. Every backend provides the
//! same observable semantics: records keyed by (identifier, instance), a
//! monotonic version checked on write (optimistic locking), atomic
//! items+conditions writes, and an identifier relabel for cart swaps.

pub mod cache;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::aggregates::cart::CartState;
use crate::domain::aggregates::item::CartItem;
use crate::domain::conditions::Condition;
use crate::Result;

/// Backend-agnostic projection of one stored cart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub identifier: String,
    pub instance: String,
    pub state: CartState,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StorageRecord {
    pub fn new(identifier: &str, instance: &str, state: CartState) -> Self {
        let now = Utc::now();
        Self {
            identifier: identifier.to_string(),
            instance: instance.to_string(),
            state,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persists and retrieves cart state.
///
/// Writes take the version the caller observed when reading (`None` for
/// "the record must not exist yet") and return the new version; a mismatch
/// is a [`crate::CartError::ConcurrencyConflict`] and the engine never
/// retries it internally. Timeouts and connection failures surface as
/// [`crate::CartError::StorageUnavailable`].
#[async_trait]
pub trait CartStorage: Send + Sync {
    async fn has(&self, identifier: &str, instance: &str) -> Result<bool> {
        Ok(self.load(identifier, instance).await?.is_some())
    }

    /// Reads the whole record, if present.
    async fn load(&self, identifier: &str, instance: &str) -> Result<Option<StorageRecord>>;

    async fn get_items(&self, identifier: &str, instance: &str) -> Result<Vec<CartItem>> {
        Ok(self
            .load(identifier, instance)
            .await?
            .map(|r| r.state.items().to_vec())
            .unwrap_or_default())
    }

    async fn get_conditions(&self, identifier: &str, instance: &str) -> Result<Vec<Condition>> {
        Ok(self
            .load(identifier, instance)
            .await?
            .map(|r| r.state.conditions().to_vec())
            .unwrap_or_default())
    }

    async fn get_metadata(
        &self,
        identifier: &str,
        instance: &str,
    ) -> Result<BTreeMap<String, Value>> {
        Ok(self
            .load(identifier, instance)
            .await?
            .map(|r| r.state.metadata().clone())
            .unwrap_or_default())
    }

    async fn get_version(&self, identifier: &str, instance: &str) -> Result<Option<u64>> {
        Ok(self.load(identifier, instance).await?.map(|r| r.version))
    }

    /// Replaces the items document, leaving conditions and metadata alone.
    async fn put_items(
        &self,
        identifier: &str,
        instance: &str,
        items: Vec<CartItem>,
        expected: Option<u64>,
    ) -> Result<u64>;

    /// Replaces the cart-level conditions document.
    async fn put_conditions(
        &self,
        identifier: &str,
        instance: &str,
        conditions: Vec<Condition>,
        expected: Option<u64>,
    ) -> Result<u64>;

    /// Replaces items and conditions in one write. No reader may observe
    /// one without the other.
    async fn put_both(
        &self,
        identifier: &str,
        instance: &str,
        items: Vec<CartItem>,
        conditions: Vec<Condition>,
        expected: Option<u64>,
    ) -> Result<u64>;

    /// Upserts one metadata key.
    async fn put_metadata(
        &self,
        identifier: &str,
        instance: &str,
        key: &str,
        value: Value,
        expected: Option<u64>,
    ) -> Result<u64>;

    /// Replaces the whole metadata document (an empty map clears it).
    async fn put_metadata_batch(
        &self,
        identifier: &str,
        instance: &str,
        metadata: BTreeMap<String, Value>,
        expected: Option<u64>,
    ) -> Result<u64>;

    /// Deletes one instance's record. Returns whether a record existed.
    async fn forget(&self, identifier: &str, instance: &str) -> Result<bool>;

    /// Deletes every instance for an identifier (logout, account
    /// deletion). Returns the number of records removed.
    async fn forget_identifier(&self, identifier: &str) -> Result<u64>;

    /// Instance names with any stored record for the identifier.
    async fn get_instances(&self, identifier: &str) -> Result<Vec<String>>;

    /// Atomically relabels a record from one identifier to another,
    /// replacing whatever record sits at the destination. Returns false
    /// if the source record does not exist; the destination is untouched
    /// in that case.
    async fn swap_identifier(
        &self,
        old_identifier: &str,
        new_identifier: &str,
        instance: &str,
    ) -> Result<bool>;
}

/// Shared optimistic-lock check: the version a writer observed must match
/// what storage currently holds (`None` on both sides for a create).
pub(crate) fn check_version(
    identifier: &str,
    instance: &str,
    expected: Option<u64>,
    found: Option<u64>,
) -> Result<()> {
    if expected == found {
        return Ok(());
    }
    Err(crate::CartError::ConcurrencyConflict {
        identifier: identifier.to_string(),
        instance: instance.to_string(),
        expected,
        found,
    })
}
