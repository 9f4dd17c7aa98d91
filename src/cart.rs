//! Storage-backed cart handle
//!
//! A [`Cart`] is one resolved (identifier, instance) pair wired to a
//! storage backend. Every mutation is read-modify-write: load the current
//! state with its version, apply the change to the pure [`CartState`], and
//! write back under that version. A concurrent writer surfaces as
//! [`crate::CartError::ConcurrencyConflict`] for the caller to retry.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::config::{CartConfig, EmptyCartPolicy, ProjectionSync};
use crate::domain::aggregates::cart::{CartExport, CartState};
use crate::domain::aggregates::item::{CartItem, ItemUpdate, UpdateResult};
use crate::domain::conditions::Condition;
use crate::domain::events::{CartEvent, EventSink};
use crate::domain::value_objects::Money;
use crate::pricing::{self, PricingOptions, Totals};
use crate::storage::CartStorage;
use crate::Result;

#[derive(Clone)]
pub struct Cart {
    identifier: String,
    instance: String,
    storage: Arc<dyn CartStorage>,
    config: Arc<CartConfig>,
    events: Arc<dyn EventSink>,
}

/// Which stored document a mutation touched.
enum Patch {
    Items,
    Conditions,
    MetadataKey(String, Value),
    MetadataAll,
}

impl Cart {
    pub(crate) fn new(
        identifier: String,
        instance: String,
        storage: Arc<dyn CartStorage>,
        config: Arc<CartConfig>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            identifier,
            instance,
            storage,
            config,
            events,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    fn pricing_options(&self) -> PricingOptions {
        PricingOptions {
            evaluate_global_conditions: self.config.evaluate_global_conditions,
        }
    }

    /// Current state plus the version it was read at (`None` = no record).
    async fn snapshot(&self) -> Result<(CartState, Option<u64>)> {
        match self.storage.load(&self.identifier, &self.instance).await? {
            Some(record) => Ok((record.state, Some(record.version))),
            None => Ok((CartState::default(), None)),
        }
    }

    /// Writes the mutated state back under the observed version, honoring
    /// the empty-cart policy. Returns the new version, or `None` when the
    /// record was removed because the aggregate became empty.
    async fn write_back(
        &self,
        state: &CartState,
        version: Option<u64>,
        patch: Patch,
    ) -> Result<Option<u64>> {
        if state.is_empty() && self.config.empty_cart_policy == EmptyCartPolicy::Delete {
            if version.is_some() {
                self.storage.forget(&self.identifier, &self.instance).await?;
            }
            debug!(identifier = %self.identifier, instance = %self.instance, "empty cart dropped");
            return Ok(None);
        }
        let created = version.is_none();
        let new_version = match patch {
            Patch::Items => {
                self.storage
                    .put_items(
                        &self.identifier,
                        &self.instance,
                        state.items().to_vec(),
                        version,
                    )
                    .await?
            }
            Patch::Conditions => {
                self.storage
                    .put_conditions(
                        &self.identifier,
                        &self.instance,
                        state.conditions().to_vec(),
                        version,
                    )
                    .await?
            }
            Patch::MetadataKey(key, value) => {
                self.storage
                    .put_metadata(&self.identifier, &self.instance, &key, value, version)
                    .await?
            }
            Patch::MetadataAll => {
                self.storage
                    .put_metadata_batch(
                        &self.identifier,
                        &self.instance,
                        state.metadata().clone(),
                        version,
                    )
                    .await?
            }
        };
        if created {
            self.events.publish(CartEvent::Created {
                identifier: self.identifier.clone(),
                instance: self.instance.clone(),
            });
        }
        let totals = match self.config.projection_sync {
            ProjectionSync::Inline => {
                Some(pricing::price(state, &self.pricing_options()).into())
            }
            ProjectionSync::Queued => None,
        };
        self.events.publish(CartEvent::Updated {
            identifier: self.identifier.clone(),
            instance: self.instance.clone(),
            version: new_version,
            totals,
        });
        Ok(Some(new_version))
    }

    // -------------------------------------------------------------------
    // Items
    // -------------------------------------------------------------------

    /// Adds an item, merging quantities when the id already exists.
    /// Returns the resulting line.
    pub async fn add(&self, item: CartItem) -> Result<CartItem> {
        let (mut state, version) = self.snapshot().await?;
        let line = state.add_item(item);
        self.write_back(&state, version, Patch::Items).await?;
        self.events.publish(CartEvent::ItemAdded {
            identifier: self.identifier.clone(),
            instance: self.instance.clone(),
            item: line.clone(),
        });
        Ok(line)
    }

    /// Adds several items in one write, returning the resulting lines in
    /// call order.
    pub async fn add_many(&self, items: Vec<CartItem>) -> Result<Vec<CartItem>> {
        let (mut state, version) = self.snapshot().await?;
        let lines: Vec<CartItem> = items.into_iter().map(|i| state.add_item(i)).collect();
        self.write_back(&state, version, Patch::Items).await?;
        for line in &lines {
            self.events.publish(CartEvent::ItemAdded {
                identifier: self.identifier.clone(),
                instance: self.instance.clone(),
                item: line.clone(),
            });
        }
        Ok(lines)
    }

    /// Applies a partial update. A quantity of zero or less removes the
    /// item; an unknown id is `UpdateResult::NotFound`, not an error.
    pub async fn update(&self, id: &str, update: ItemUpdate) -> Result<UpdateResult> {
        let (mut state, version) = self.snapshot().await?;
        let outcome = state.update_item(id, &update)?;
        match &outcome {
            UpdateResult::NotFound => return Ok(outcome),
            UpdateResult::Updated(item) => {
                self.write_back(&state, version, Patch::Items).await?;
                self.events.publish(CartEvent::ItemUpdated {
                    identifier: self.identifier.clone(),
                    instance: self.instance.clone(),
                    item: item.clone(),
                });
            }
            UpdateResult::Removed(item) => {
                self.write_back(&state, version, Patch::Items).await?;
                self.events.publish(CartEvent::ItemRemoved {
                    identifier: self.identifier.clone(),
                    instance: self.instance.clone(),
                    item_id: item.id().to_string(),
                });
            }
        }
        Ok(outcome)
    }

    /// Removes an item and its conditions. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let (mut state, version) = self.snapshot().await?;
        if state.remove_item(id).is_none() {
            return Ok(false);
        }
        self.write_back(&state, version, Patch::Items).await?;
        self.events.publish(CartEvent::ItemRemoved {
            identifier: self.identifier.clone(),
            instance: self.instance.clone(),
            item_id: id.to_string(),
        });
        Ok(true)
    }

    // -------------------------------------------------------------------
    // Conditions
    // -------------------------------------------------------------------

    /// Adds a cart-level condition, replacing any condition with the same
    /// name.
    pub async fn add_condition(&self, condition: Condition) -> Result<()> {
        let (mut state, version) = self.snapshot().await?;
        let name = condition.name().to_string();
        state.add_condition(condition)?;
        self.write_back(&state, version, Patch::Conditions).await?;
        self.events.publish(CartEvent::ConditionAdded {
            identifier: self.identifier.clone(),
            instance: self.instance.clone(),
            name,
        });
        Ok(())
    }

    pub async fn remove_condition(&self, name: &str) -> Result<bool> {
        let (mut state, version) = self.snapshot().await?;
        if state.remove_condition(name).is_none() {
            return Ok(false);
        }
        self.write_back(&state, version, Patch::Conditions).await?;
        self.events.publish(CartEvent::ConditionRemoved {
            identifier: self.identifier.clone(),
            instance: self.instance.clone(),
            name: name.to_string(),
        });
        Ok(true)
    }

    /// Attaches a condition to one item. Returns false if the item does
    /// not exist.
    pub async fn add_item_condition(&self, item_id: &str, condition: Condition) -> Result<bool> {
        let (mut state, version) = self.snapshot().await?;
        let name = condition.name().to_string();
        if !state.add_item_condition(item_id, condition)? {
            return Ok(false);
        }
        self.write_back(&state, version, Patch::Items).await?;
        self.events.publish(CartEvent::ConditionAdded {
            identifier: self.identifier.clone(),
            instance: self.instance.clone(),
            name,
        });
        Ok(true)
    }

    pub async fn remove_item_condition(&self, item_id: &str, name: &str) -> Result<bool> {
        let (mut state, version) = self.snapshot().await?;
        if !state.remove_item_condition(item_id, name) {
            return Ok(false);
        }
        self.write_back(&state, version, Patch::Items).await?;
        self.events.publish(CartEvent::ConditionRemoved {
            identifier: self.identifier.clone(),
            instance: self.instance.clone(),
            name: name.to_string(),
        });
        Ok(true)
    }

    // -------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------

    pub async fn set_metadata(&self, key: &str, value: Value) -> Result<()> {
        let (mut state, version) = self.snapshot().await?;
        state.set_metadata(key, value.clone());
        self.write_back(
            &state,
            version,
            Patch::MetadataKey(key.to_string(), value),
        )
        .await?;
        Ok(())
    }

    pub async fn get_metadata(&self, key: &str) -> Result<Option<Value>> {
        let (state, _) = self.snapshot().await?;
        Ok(state.get_metadata(key).cloned())
    }

    pub async fn clear_metadata(&self) -> Result<()> {
        let (mut state, version) = self.snapshot().await?;
        if version.is_none() {
            return Ok(());
        }
        state.clear_metadata();
        self.write_back(&state, version, Patch::MetadataAll).await?;
        Ok(())
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    /// Empties items, conditions and metadata. With the delete-on-empty
    /// policy the record itself is removed; `destroy` removes it
    /// regardless of policy.
    pub async fn clear(&self) -> Result<()> {
        let (mut state, version) = self.snapshot().await?;
        if version.is_none() {
            return Ok(());
        }
        state.clear();
        if self.config.empty_cart_policy == EmptyCartPolicy::Delete {
            self.storage.forget(&self.identifier, &self.instance).await?;
        } else {
            // two writes; items+conditions stay atomic, metadata follows
            let version = self
                .storage
                .put_both(&self.identifier, &self.instance, vec![], vec![], version)
                .await?;
            self.storage
                .put_metadata_batch(
                    &self.identifier,
                    &self.instance,
                    Default::default(),
                    Some(version),
                )
                .await?;
        }
        self.events.publish(CartEvent::Cleared {
            identifier: self.identifier.clone(),
            instance: self.instance.clone(),
        });
        Ok(())
    }

    /// Hard-deletes the stored record regardless of content or policy.
    pub async fn destroy(&self) -> Result<bool> {
        let existed = self.storage.forget(&self.identifier, &self.instance).await?;
        if existed {
            self.events.publish(CartEvent::Cleared {
                identifier: self.identifier.clone(),
                instance: self.instance.clone(),
            });
        }
        Ok(existed)
    }

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    pub async fn items(&self) -> Result<Vec<CartItem>> {
        self.storage.get_items(&self.identifier, &self.instance).await
    }

    pub async fn conditions(&self) -> Result<Vec<Condition>> {
        self.storage
            .get_conditions(&self.identifier, &self.instance)
            .await
    }

    pub async fn get_item(&self, id: &str) -> Result<Option<CartItem>> {
        let (state, _) = self.snapshot().await?;
        Ok(state.get_item(id).cloned())
    }

    /// Items matching the predicate; read-only.
    pub async fn search<P>(&self, predicate: P) -> Result<Vec<CartItem>>
    where
        P: Fn(&CartItem) -> bool,
    {
        let (state, _) = self.snapshot().await?;
        Ok(state.search(predicate).cloned().collect())
    }

    /// One full pricing pass over the current state.
    pub async fn totals(&self) -> Result<Totals> {
        let (state, _) = self.snapshot().await?;
        Ok(pricing::price(&state, &self.pricing_options()))
    }

    pub async fn subtotal(&self) -> Result<i64> {
        Ok(self.totals().await?.subtotal)
    }

    pub async fn subtotal_without_conditions(&self) -> Result<i64> {
        Ok(self.totals().await?.subtotal_without_conditions)
    }

    pub async fn total(&self) -> Result<i64> {
        Ok(self.totals().await?.total)
    }

    pub async fn savings(&self) -> Result<i64> {
        Ok(self.totals().await?.savings)
    }

    /// Grand total tagged with the configured currency.
    pub async fn total_money(&self) -> Result<Money> {
        Ok(Money::new(
            self.totals().await?.total,
            &self.config.default_currency,
        ))
    }

    /// Unique item lines.
    pub async fn count(&self) -> Result<usize> {
        let (state, _) = self.snapshot().await?;
        Ok(state.count())
    }

    /// Sum of unit quantities.
    pub async fn total_quantity(&self) -> Result<u64> {
        let (state, _) = self.snapshot().await?;
        Ok(state.total_quantity())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        let (state, _) = self.snapshot().await?;
        Ok(state.is_empty())
    }

    pub async fn exists(&self) -> Result<bool> {
        self.storage.has(&self.identifier, &self.instance).await
    }

    pub async fn version(&self) -> Result<Option<u64>> {
        self.storage
            .get_version(&self.identifier, &self.instance)
            .await
    }

    /// Exports state plus priced figures; see [`CartExport::into_state`]
    /// for the reverse direction.
    pub async fn to_export(&self) -> Result<CartExport> {
        let (state, _) = self.snapshot().await?;
        Ok(state.export(&self.pricing_options()))
    }
}
