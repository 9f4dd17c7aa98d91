//! Cart Aggregate
//!
//! [`CartState`] is the pure aggregate: items, cart-level conditions and
//! metadata for one (identifier, instance) pair, with no storage wiring.
//! The storage-backed handle in [`crate::cart`] loads a `CartState`, mutates
//! it through these methods and writes it back under optimistic locking.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::aggregates::item::{CartItem, ItemUpdate, QuantityChange, UpdateResult};
use crate::domain::conditions::{Condition, Target};
use crate::pricing::{self, PricingOptions};
use crate::{CartError, Result};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CartState {
    #[serde(default)]
    items: Vec<CartItem>,
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

impl CartState {
    /// Rebuilds an aggregate from its stored parts.
    pub fn from_parts(
        items: Vec<CartItem>,
        conditions: Vec<Condition>,
        metadata: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            items,
            conditions,
            metadata,
        }
    }

    pub(crate) fn set_items(&mut self, items: Vec<CartItem>) {
        self.items = items;
    }

    pub(crate) fn set_conditions(&mut self, conditions: Vec<Condition>) {
        self.conditions = conditions;
    }

    pub(crate) fn set_metadata_map(&mut self, metadata: BTreeMap<String, Value>) {
        self.metadata = metadata;
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    pub fn get_item(&self, id: &str) -> Option<&CartItem> {
        self.items.iter().find(|i| i.id() == id)
    }

    /// Adds an item, merging by id: quantities are summed and the existing
    /// line's price, attributes and conditions are kept. Returns the
    /// resulting line.
    pub fn add_item(&mut self, item: CartItem) -> CartItem {
        if let Some(existing) = self.items.iter_mut().find(|i| i.id == item.id) {
            existing.quantity = existing.quantity.saturating_add(item.quantity);
            return existing.clone();
        }
        self.items.push(item);
        self.items[self.items.len() - 1].clone()
    }

    /// Applies a partial update. A resulting quantity of zero or less
    /// removes the item; an unknown id is a benign `NotFound` outcome.
    pub fn update_item(&mut self, id: &str, update: &ItemUpdate) -> Result<UpdateResult> {
        if let Some(price) = update.price {
            if price < 0 {
                return Err(CartError::Validation(format!(
                    "item {id}: price must not be negative (got {price})"
                )));
            }
        }
        let Some(position) = self.items.iter().position(|i| i.id() == id) else {
            return Ok(UpdateResult::NotFound);
        };

        let item = &mut self.items[position];
        if let Some(name) = &update.name {
            item.name = name.clone();
        }
        if let Some(price) = update.price {
            item.price = price;
        }
        if let Some(attributes) = &update.attributes {
            item.attributes = attributes.clone();
        }
        let new_quantity = match update.quantity {
            None => i64::from(item.quantity),
            Some(QuantityChange::Absolute(q)) => i64::from(q),
            Some(QuantityChange::Relative(delta)) => i64::from(item.quantity) + delta,
        };
        if new_quantity <= 0 {
            let removed = self.items.remove(position);
            return Ok(UpdateResult::Removed(removed));
        }
        item.quantity = new_quantity.min(i64::from(u32::MAX)) as u32;
        Ok(UpdateResult::Updated(item.clone()))
    }

    /// Removes an item and its item-level conditions with it. No-op on an
    /// unknown id.
    pub fn remove_item(&mut self, id: &str) -> Option<CartItem> {
        let position = self.items.iter().position(|i| i.id() == id)?;
        Some(self.items.remove(position))
    }

    /// Adds a cart-level condition, replacing any existing condition with
    /// the same name. Cart-level conditions must target `subtotal` or
    /// `total`.
    pub fn add_condition(&mut self, condition: Condition) -> Result<()> {
        if condition.target() == Target::Item {
            return Err(CartError::Validation(format!(
                "condition {} targets item; attach it to an item instead",
                condition.name()
            )));
        }
        self.conditions.retain(|c| c.name() != condition.name());
        self.conditions.push(condition);
        Ok(())
    }

    pub fn remove_condition(&mut self, name: &str) -> Option<Condition> {
        let position = self.conditions.iter().position(|c| c.name() == name)?;
        Some(self.conditions.remove(position))
    }

    pub fn get_condition(&self, name: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.name() == name)
    }

    /// Attaches a condition to an item, replacing by name. Returns false
    /// if the item does not exist.
    pub fn add_item_condition(&mut self, item_id: &str, condition: Condition) -> Result<bool> {
        if condition.target() != Target::Item {
            return Err(CartError::Validation(format!(
                "condition {} targets {:?}, item conditions must target item",
                condition.name(),
                condition.target()
            )));
        }
        let Some(item) = self.items.iter_mut().find(|i| i.id() == item_id) else {
            return Ok(false);
        };
        item.conditions.retain(|c| c.name() != condition.name());
        item.conditions.push(condition);
        Ok(true)
    }

    pub fn remove_item_condition(&mut self, item_id: &str, name: &str) -> bool {
        let Some(item) = self.items.iter_mut().find(|i| i.id() == item_id) else {
            return false;
        };
        let before = item.conditions.len();
        item.conditions.retain(|c| c.name() != name);
        item.conditions.len() != before
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn clear_metadata(&mut self) {
        self.metadata.clear();
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.conditions.clear();
        self.metadata.clear();
    }

    /// Empty means nothing at all: no items, no conditions, no metadata.
    /// Empty aggregates may be physically absent from storage.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.conditions.is_empty() && self.metadata.is_empty()
    }

    /// Number of unique item lines.
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Sum of unit quantities across all lines.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity())).sum()
    }

    /// Σ price × quantity, before any conditions.
    pub fn subtotal_without_conditions(&self) -> i64 {
        self.items.iter().map(CartItem::line_subtotal).sum()
    }

    /// Lazily yields items matching the predicate, without mutating.
    pub fn search<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a CartItem>
    where
        P: Fn(&CartItem) -> bool + 'a,
    {
        self.items.iter().filter(move |i| predicate(i))
    }

    /// Exports the aggregate with its priced figures. Reconstructing via
    /// [`CartExport::into_state`] reproduces identical totals.
    pub fn export(&self, options: &PricingOptions) -> CartExport {
        let totals = pricing::price(self, options);
        CartExport {
            items: self.items.clone(),
            conditions: self.conditions.clone(),
            metadata: self.metadata.clone(),
            subtotal: totals.subtotal,
            subtotal_without_conditions: totals.subtotal_without_conditions,
            total: totals.total,
            savings: totals.savings,
            quantity: totals.quantity,
            count: totals.count,
            is_empty: self.is_empty(),
        }
    }
}

/// Serializable export of a cart: raw state plus the derived figures at the
/// time of export.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartExport {
    pub items: Vec<CartItem>,
    pub conditions: Vec<Condition>,
    pub metadata: BTreeMap<String, Value>,
    pub subtotal: i64,
    pub subtotal_without_conditions: i64,
    pub total: i64,
    pub savings: i64,
    pub quantity: u64,
    pub count: usize,
    pub is_empty: bool,
}

impl CartExport {
    /// Rebuilds the pure aggregate; derived figures are recomputed on
    /// demand, never trusted from the export.
    pub fn into_state(self) -> CartState {
        CartState {
            items: self.items,
            conditions: self.conditions,
            metadata: self.metadata,
        }
    }
}
