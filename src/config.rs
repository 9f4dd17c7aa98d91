//! Engine configuration
//!
//! A plain struct with sensible defaults. `from_env` reads `CART_*`
//! variables for services that configure through the environment; loading
//! a `.env` file first is the binary's job.

use crate::{CartError, Result};

/// Storage driver selection, for callers that build the backend from
/// configuration rather than constructing one directly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StorageDriver {
    #[default]
    Memory,
    Cache,
    Postgres,
}

impl StorageDriver {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" | "session" => Ok(Self::Memory),
            "cache" => Ok(Self::Cache),
            "postgres" | "database" => Ok(Self::Postgres),
            other => Err(CartError::Validation(format!(
                "unknown storage driver {other:?}"
            ))),
        }
    }
}

/// Policy for reconciling item quantities when a guest cart is migrated
/// into a user cart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Sum quantities of matching items.
    #[default]
    AddQuantities,
    /// Keep whichever side has the larger quantity.
    KeepHighestQuantity,
    /// Matching items keep the user cart's quantity.
    KeepUserCart,
    /// Matching items take the guest cart's quantity.
    ReplaceWithGuest,
}

impl MergeStrategy {
    /// Strict parse; unrecognized input is an error.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "add_quantities" => Ok(Self::AddQuantities),
            "keep_highest_quantity" => Ok(Self::KeepHighestQuantity),
            "keep_user_cart" => Ok(Self::KeepUserCart),
            "replace_with_guest" => Ok(Self::ReplaceWithGuest),
            other => Err(CartError::MergeStrategyInvalid(other.to_string())),
        }
    }

    /// Lenient resolve used by migration: an unrecognized strategy logs a
    /// warning and falls back to `add_quantities` rather than failing the
    /// whole migration.
    pub fn resolve(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|_| {
            tracing::warn!(strategy = raw, "unrecognized merge strategy, falling back to add_quantities");
            Self::AddQuantities
        })
    }
}

/// What happens to the storage record when a mutation leaves the aggregate
/// empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EmptyCartPolicy {
    /// Keep an empty record around.
    Keep,
    /// Remove the record entirely (`destroy` deletes regardless).
    #[default]
    Delete,
}

/// Whether denormalized read projections are refreshed inline (update
/// events carry fresh totals) or queued (listeners re-price themselves).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProjectionSync {
    #[default]
    Inline,
    Queued,
}

#[derive(Clone, Debug)]
pub struct CartConfig {
    pub driver: StorageDriver,
    pub default_instance: String,
    pub default_currency: String,
    /// Raw configured strategy, resolved leniently at migration time.
    pub merge_strategy: String,
    pub auto_migrate_on_login: bool,
    pub empty_cart_policy: EmptyCartPolicy,
    pub evaluate_global_conditions: bool,
    pub projection_sync: ProjectionSync,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            driver: StorageDriver::Memory,
            default_instance: "default".to_string(),
            default_currency: "MYR".to_string(),
            merge_strategy: "add_quantities".to_string(),
            auto_migrate_on_login: true,
            empty_cart_policy: EmptyCartPolicy::Delete,
            evaluate_global_conditions: true,
            projection_sync: ProjectionSync::Inline,
        }
    }
}

impl CartConfig {
    /// Reads `CART_*` environment variables, keeping defaults for anything
    /// unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(driver) = std::env::var("CART_DRIVER") {
            if let Ok(parsed) = StorageDriver::parse(&driver) {
                config.driver = parsed;
            }
        }
        if let Ok(instance) = std::env::var("CART_DEFAULT_INSTANCE") {
            config.default_instance = instance;
        }
        if let Ok(currency) = std::env::var("CART_CURRENCY") {
            config.default_currency = currency;
        }
        if let Ok(strategy) = std::env::var("CART_MERGE_STRATEGY") {
            config.merge_strategy = strategy;
        }
        if let Ok(auto) = std::env::var("CART_AUTO_MIGRATE_ON_LOGIN") {
            config.auto_migrate_on_login = matches!(auto.as_str(), "1" | "true" | "yes");
        }
        if let Ok(policy) = std::env::var("CART_EMPTY_POLICY") {
            config.empty_cart_policy = match policy.as_str() {
                "keep" => EmptyCartPolicy::Keep,
                _ => EmptyCartPolicy::Delete,
            };
        }
        if let Ok(globals) = std::env::var("CART_GLOBAL_CONDITIONS") {
            config.evaluate_global_conditions = !matches!(globals.as_str(), "0" | "false" | "no");
        }
        if let Ok(sync) = std::env::var("CART_PROJECTION_SYNC") {
            config.projection_sync = match sync.as_str() {
                "queued" => ProjectionSync::Queued,
                _ => ProjectionSync::Inline,
            };
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_strategy_parse() {
        assert_eq!(
            MergeStrategy::parse("keep_highest_quantity").unwrap(),
            MergeStrategy::KeepHighestQuantity
        );
        assert!(matches!(
            MergeStrategy::parse("take_the_best"),
            Err(CartError::MergeStrategyInvalid(_))
        ));
    }

    #[test]
    fn test_merge_strategy_resolve_falls_back() {
        assert_eq!(MergeStrategy::resolve("nonsense"), MergeStrategy::AddQuantities);
        assert_eq!(
            MergeStrategy::resolve("replace_with_guest"),
            MergeStrategy::ReplaceWithGuest
        );
    }

    #[test]
    fn test_driver_parse() {
        assert_eq!(StorageDriver::parse("Postgres").unwrap(), StorageDriver::Postgres);
        assert!(StorageDriver::parse("redis").is_err());
    }
}
