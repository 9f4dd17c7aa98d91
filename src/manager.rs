//! Instance manager
//!
//! Resolves (instance, identifier) pairs to [`Cart`] handles over one
//! shared storage backend, config and event sink. Instances sharing an
//! identifier are fully isolated; resolving a handle never mutates stored
//! data.

use sqlx::PgPool;
use std::sync::Arc;

use crate::cart::Cart;
use crate::config::{CartConfig, StorageDriver};
use crate::domain::events::{EventSink, NullSink};
use crate::migration::MigrationService;
use crate::storage::cache::{CacheStorage, LocalCache};
use crate::storage::memory::MemoryStorage;
use crate::storage::postgres::PostgresStorage;
use crate::storage::CartStorage;
use crate::{CartError, Result};

#[derive(Clone)]
pub struct CartManager {
    storage: Arc<dyn CartStorage>,
    config: Arc<CartConfig>,
    events: Arc<dyn EventSink>,
}

impl CartManager {
    pub fn new(storage: Arc<dyn CartStorage>, config: CartConfig) -> Self {
        Self {
            storage,
            config: Arc::new(config),
            events: Arc::new(NullSink),
        }
    }

    /// Builds the backend named by `config.driver`. The Postgres driver
    /// needs a connection pool; the other drivers ignore it.
    pub fn from_config(config: CartConfig, pool: Option<PgPool>) -> Result<Self> {
        let storage: Arc<dyn CartStorage> = match config.driver {
            StorageDriver::Memory => Arc::new(MemoryStorage::new()),
            StorageDriver::Cache => Arc::new(CacheStorage::new(LocalCache::new())),
            StorageDriver::Postgres => {
                let pool = pool.ok_or_else(|| {
                    CartError::Validation(
                        "postgres driver requires a connection pool".into(),
                    )
                })?;
                Arc::new(PostgresStorage::new(pool))
            }
        };
        Ok(Self::new(storage, config))
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &CartConfig {
        &self.config
    }

    /// Handle for the configured default instance.
    pub fn cart(&self, identifier: &str) -> Cart {
        self.resolve(self.config.default_instance.as_str(), identifier)
    }

    /// Handle for an arbitrary instance label (wishlist, comparison, ...).
    /// Cheap; the record is created lazily on first mutation.
    pub fn resolve(&self, instance: &str, identifier: &str) -> Cart {
        Cart::new(
            identifier.to_string(),
            instance.to_string(),
            Arc::clone(&self.storage),
            Arc::clone(&self.config),
            Arc::clone(&self.events),
        )
    }

    /// Instance names with any stored record for the identifier.
    pub async fn instances(&self, identifier: &str) -> Result<Vec<String>> {
        self.storage.get_instances(identifier).await
    }

    /// Removes every instance for the identifier (logout, account
    /// deletion). Returns the number of records removed.
    pub async fn forget_identifier(&self, identifier: &str) -> Result<u64> {
        self.storage.forget_identifier(identifier).await
    }

    /// Migration/swap service sharing this manager's wiring.
    pub fn migration(&self) -> MigrationService {
        MigrationService::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.config),
            Arc::clone(&self.events),
        )
    }
}
