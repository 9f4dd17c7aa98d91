//! Cart line items

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::conditions::{Condition, Target};
use crate::{CartError, Result};

/// A line entry in a cart: unit price in minor currency units, a positive
/// quantity, arbitrary attributes and item-level conditions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) price: i64,
    pub(crate) quantity: u32,
    #[serde(default)]
    pub(crate) attributes: BTreeMap<String, Value>,
    #[serde(default)]
    pub(crate) conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) associated_model: Option<String>,
}

impl CartItem {
    /// Builds a validated item. Price must be non-negative, quantity at
    /// least 1, id non-empty.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        price: i64,
        quantity: u32,
    ) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CartError::Validation("item id must not be empty".into()));
        }
        if price < 0 {
            return Err(CartError::Validation(format!(
                "item {id}: price must not be negative (got {price})"
            )));
        }
        if quantity < 1 {
            return Err(CartError::Validation(format!(
                "item {id}: quantity must be at least 1"
            )));
        }
        Ok(Self {
            id,
            name: name.into(),
            price,
            quantity,
            attributes: BTreeMap::new(),
            conditions: Vec::new(),
            associated_model: None,
        })
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, attributes: BTreeMap<String, Value>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Attaches an item-level condition. The condition must target `item`.
    pub fn with_condition(mut self, condition: Condition) -> Result<Self> {
        if condition.target() != Target::Item {
            return Err(CartError::Validation(format!(
                "condition {} targets {:?}, item conditions must target item",
                condition.name(),
                condition.target()
            )));
        }
        self.conditions.retain(|c| c.name() != condition.name());
        self.conditions.push(condition);
        Ok(self)
    }

    pub fn with_associated_model(mut self, model: impl Into<String>) -> Self {
        self.associated_model = Some(model.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn price(&self) -> i64 {
        self.price
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn associated_model(&self) -> Option<&str> {
        self.associated_model.as_deref()
    }

    /// Price × quantity, before the item's own conditions.
    pub fn line_subtotal(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }
}

/// Quantity change carried by an [`ItemUpdate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuantityChange {
    /// Replace the quantity outright.
    Absolute(u32),
    /// Add to (positive) or subtract from (negative) the current quantity.
    Relative(i64),
}

/// A partial update to an existing item. Unset fields are left untouched.
#[derive(Clone, Debug, Default)]
pub struct ItemUpdate {
    pub(crate) name: Option<String>,
    pub(crate) price: Option<i64>,
    pub(crate) quantity: Option<QuantityChange>,
    pub(crate) attributes: Option<BTreeMap<String, Value>>,
}

impl ItemUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the quantity to an absolute value. Zero removes the item.
    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(QuantityChange::Absolute(quantity));
        self
    }

    /// Adjust the quantity relatively; a result of zero or less removes
    /// the item.
    pub fn adjust_quantity(mut self, delta: i64) -> Self {
        self.quantity = Some(QuantityChange::Relative(delta));
        self
    }

    pub fn price(mut self, price: i64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn attributes(mut self, attributes: BTreeMap<String, Value>) -> Self {
        self.attributes = Some(attributes);
        self
    }
}

/// Outcome of applying an [`ItemUpdate`].
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateResult {
    /// The item was changed in place.
    Updated(CartItem),
    /// The quantity dropped to zero or below and the item was removed.
    Removed(CartItem),
    /// No item with that id exists; the cart is unchanged.
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_items() {
        assert!(CartItem::new("", "x", 100, 1).is_err());
        assert!(CartItem::new("a", "x", -1, 1).is_err());
        assert!(CartItem::new("a", "x", 100, 0).is_err());
    }

    #[test]
    fn test_line_subtotal() {
        let item = CartItem::new("sku-1", "Widget", 1000, 3).unwrap();
        assert_eq!(item.line_subtotal(), 3000);
    }

    #[test]
    fn test_item_condition_must_target_item() {
        use crate::domain::conditions::{Condition, ConditionType};
        let bad = Condition::new("vat", ConditionType::Tax, Target::Total, "10%", 1).unwrap();
        let item = CartItem::new("sku-1", "Widget", 1000, 1).unwrap();
        assert!(item.with_condition(bad).is_err());
    }
}
