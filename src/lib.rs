//! Trolley: multi-instance shopping cart engine
//!
//! A storage-agnostic cart engine for multi-tenant shops.
//!
//! ## Features
//! - Cart aggregates keyed by (identifier, instance), isolated per instance
//! - Condition pipeline: taxes, discounts, fees applied at item, subtotal
//!   or total scope, with dynamic rule-based activation
//! - Integer minor-unit pricing, no floating point
//! - Pluggable storage (in-process, cache, Postgres), all optimistically
//!   locked with a version counter
//! - Guest-to-user cart migration with configurable merge strategies, plus
//!   atomic ownership swap
//!
//! ```no_run
//! use std::sync::Arc;
//! use trolley::{CartConfig, CartItem, CartManager, MemoryStorage};
//!
//! # async fn demo() -> trolley::Result<()> {
//! let manager = CartManager::new(Arc::new(MemoryStorage::new()), CartConfig::default());
//! let cart = manager.cart("session-42");
//! cart.add(CartItem::new("sku-1", "Widget", 1000, 2)?).await?;
//! assert_eq!(cart.total().await?, 2000);
//! # Ok(())
//! # }
//! ```

pub mod cart;
pub mod config;
pub mod domain;
pub mod manager;
pub mod migration;
pub mod pricing;
pub mod storage;

pub use cart::Cart;
pub use config::{CartConfig, EmptyCartPolicy, MergeStrategy, ProjectionSync, StorageDriver};
pub use domain::aggregates::cart::{CartExport, CartState};
pub use domain::aggregates::item::{CartItem, ItemUpdate, UpdateResult};
pub use domain::conditions::rules::Rule;
pub use domain::conditions::{Condition, ConditionType, Operator, Target};
pub use domain::events::{BroadcastSink, CartEvent, EventSink, NullSink};
pub use domain::value_objects::Money;
pub use manager::CartManager;
pub use migration::MigrationService;
pub use pricing::Totals;
pub use storage::cache::{CacheBackend, CacheStorage, LocalCache};
pub use storage::memory::MemoryStorage;
pub use storage::postgres::PostgresStorage;
pub use storage::{CartStorage, StorageRecord};

use thiserror::Error;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CartError {
    /// Malformed input at construction time: negative price, zero quantity,
    /// unparseable condition value, misplaced condition target.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Optimistic-lock version mismatch. The caller must re-read and retry;
    /// the engine never retries internally.
    #[error("version conflict on {identifier}/{instance}: expected {expected:?}, found {found:?}")]
    ConcurrencyConflict {
        identifier: String,
        instance: String,
        expected: Option<u64>,
        found: Option<u64>,
    },

    /// Backend timeout or connection failure. Retryable with backoff.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Non-transient backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Configured merge strategy is unrecognized. Surfaced by the strict
    /// parser only; migration logs a warning and falls back instead.
    #[error("unrecognized merge strategy: {0}")]
    MergeStrategyInvalid(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CartError {
    /// Whether the caller may retry the failed operation after a re-read
    /// (version conflict) or a backoff (storage outage).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CartError::ConcurrencyConflict { .. } | CartError::StorageUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CartError>;
