//! Relational storage backend
//!
//! One row per (identifier, instance) under a unique constraint, with jsonb
//! documents for items, conditions and metadata and a bigint version column
//! for optimistic locking. `swap_identifier` relabels inside a transaction,
//! so the swap has no lost-update window on this backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{CartStorage, StorageRecord};
use crate::domain::aggregates::cart::CartState;
use crate::domain::aggregates::item::CartItem;
use crate::domain::conditions::Condition;
use crate::{CartError, Result};

pub struct PostgresStorage {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct CartRow {
    identifier: String,
    instance: String,
    items: Value,
    conditions: Value,
    metadata: Value,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CartRow {
    fn into_record(self) -> Result<StorageRecord> {
        let items: Vec<CartItem> = serde_json::from_value(self.items)?;
        let conditions: Vec<Condition> = serde_json::from_value(self.conditions)?;
        let metadata: BTreeMap<String, Value> = serde_json::from_value(self.metadata)?;
        Ok(StorageRecord {
            identifier: self.identifier,
            instance: self.instance,
            state: CartState::from_parts(items, conditions, metadata),
            version: self.version as u64,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn map_sqlx(err: sqlx::Error) -> CartError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => {
            CartError::StorageUnavailable(err.to_string())
        }
        other => CartError::Storage(other.to_string()),
    }
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the backing table if it is missing. Runtime DDL keeps the
    /// library free of a build-time migrations directory.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cart_records (
                id UUID PRIMARY KEY,
                identifier TEXT NOT NULL,
                instance TEXT NOT NULL,
                items JSONB NOT NULL DEFAULT '[]',
                conditions JSONB NOT NULL DEFAULT '[]',
                metadata JSONB NOT NULL DEFAULT '{}',
                version BIGINT NOT NULL DEFAULT 1,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (identifier, instance)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn fetch(&self, identifier: &str, instance: &str) -> Result<Option<CartRow>> {
        sqlx::query_as::<_, CartRow>(
            "SELECT identifier, instance, items, conditions, metadata, version, created_at, updated_at \
             FROM cart_records WHERE identifier = $1 AND instance = $2",
        )
        .bind(identifier)
        .bind(instance)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)
    }

    /// Read, apply, then conditionally write: the UPDATE carries the
    /// observed version in its WHERE clause, so a racing writer makes it
    /// affect zero rows and we surface a conflict.
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
        let row = self.fetch(identifier, instance).await?;
        let found = row.as_ref().map(|r| r.version as u64);
        super::check_version(identifier, instance, expected, found)?;

        let mut state = match row {
            Some(row) => row.into_record()?.state,
            None => CartState::default(),
        };
        apply(&mut state);

        let items = serde_json::to_value(state.items())?;
        let conditions = serde_json::to_value(state.conditions())?;
        let metadata = serde_json::to_value(state.metadata())?;

        match expected {
            Some(version) => {
                let result = sqlx::query(
                    "UPDATE cart_records SET items = $3, conditions = $4, metadata = $5, \
                     version = version + 1, updated_at = NOW() \
                     WHERE identifier = $1 AND instance = $2 AND version = $6",
                )
                .bind(identifier)
                .bind(instance)
                .bind(items)
                .bind(conditions)
                .bind(metadata)
                .bind(version as i64)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
                if result.rows_affected() == 0 {
                    let found = self.get_version(identifier, instance).await?;
                    return Err(CartError::ConcurrencyConflict {
                        identifier: identifier.to_string(),
                        instance: instance.to_string(),
                        expected,
                        found,
                    });
                }
                Ok(version + 1)
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO cart_records \
                     (id, identifier, instance, items, conditions, metadata, version, created_at, updated_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, 1, NOW(), NOW()) \
                     ON CONFLICT (identifier, instance) DO NOTHING",
                )
                .bind(Uuid::now_v7())
                .bind(identifier)
                .bind(instance)
                .bind(items)
                .bind(conditions)
                .bind(metadata)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
                if result.rows_affected() == 0 {
                    let found = self.get_version(identifier, instance).await?;
                    return Err(CartError::ConcurrencyConflict {
                        identifier: identifier.to_string(),
                        instance: instance.to_string(),
                        expected,
                        found,
                    });
                }
                Ok(1)
            }
        }
    }
}

#[async_trait]
impl CartStorage for PostgresStorage {
    async fn load(&self, identifier: &str, instance: &str) -> Result<Option<StorageRecord>> {
        match self.fetch(identifier, instance).await? {
            Some(row) => Ok(Some(row.into_record()?)),
            None => Ok(None),
        }
    }

    async fn get_version(&self, identifier: &str, instance: &str) -> Result<Option<u64>> {
        let version: Option<(i64,)> = sqlx::query_as(
            "SELECT version FROM cart_records WHERE identifier = $1 AND instance = $2",
        )
        .bind(identifier)
        .bind(instance)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(version.map(|(v,)| v as u64))
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
        let result =
            sqlx::query("DELETE FROM cart_records WHERE identifier = $1 AND instance = $2")
                .bind(identifier)
                .bind(instance)
                .execute(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn forget_identifier(&self, identifier: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cart_records WHERE identifier = $1")
            .bind(identifier)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn get_instances(&self, identifier: &str) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT instance FROM cart_records WHERE identifier = $1 ORDER BY instance",
        )
        .bind(identifier)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(rows.into_iter().map(|(instance,)| instance).collect())
    }

    async fn swap_identifier(
        &self,
        old_identifier: &str,
        new_identifier: &str,
        instance: &str,
    ) -> Result<bool> {
        // one transaction: the destination is replaced and the source
        // relabeled atomically, or neither happens
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        sqlx::query("DELETE FROM cart_records WHERE identifier = $1 AND instance = $2")
            .bind(new_identifier)
            .bind(instance)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let result = sqlx::query(
            "UPDATE cart_records SET identifier = $2, updated_at = NOW() \
             WHERE identifier = $1 AND instance = $3",
        )
        .bind(old_identifier)
        .bind(new_identifier)
        .bind(instance)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx)?;
            return Ok(false);
        }
        tx.commit().await.map_err(map_sqlx)?;
        Ok(true)
    }
}
