//! Dynamic condition rules
//!
//! Rules are plain data (a serde tagged union) evaluated by a pure function
//! over the current cart snapshot, so dynamic conditions stay serializable
//! and auditable. A dynamic condition is active only while every one of its
//! rules holds; activation is re-checked on each pricing pass.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::aggregates::cart::CartState;
use crate::domain::aggregates::item::CartItem;

/// Activation predicate vocabulary for dynamic conditions.
///
/// Item-scoped rules (`min_item_quantity`, `min_item_price`, and the
/// membership rules) check the item in context when evaluated for an
/// item-level condition, and fall back to "any item matches" when evaluated
/// cart-wide.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    /// Total unit quantity across all lines is at least `count`.
    MinItems { count: u32 },
    /// Total unit quantity across all lines is at most `count`.
    MaxItems { count: u32 },
    /// Raw item subtotal (price × quantity, before any conditions) is at
    /// least `amount` minor units.
    MinTotal { amount: i64 },
    /// Raw item subtotal is at most `amount` minor units.
    MaxTotal { amount: i64 },
    /// An item carries the attribute `"category"` equal to `category`.
    HasCategory { category: String },
    /// An item with one of the given ids is in the cart.
    HasItems { ids: Vec<String> },
    /// The cart metadata key `"vip"` is boolean true.
    Vip,
    /// An item line has at least `quantity` units.
    MinItemQuantity { quantity: u32 },
    /// An item's unit price is at least `amount` minor units.
    MinItemPrice { amount: i64 },
}

impl Rule {
    /// Evaluates the rule against a cart snapshot and, for item-level
    /// conditions, the item being priced. Pure; no storage access.
    pub fn evaluate(&self, cart: &CartState, item: Option<&CartItem>) -> bool {
        match self {
            Rule::MinItems { count } => cart.total_quantity() >= u64::from(*count),
            Rule::MaxItems { count } => cart.total_quantity() <= u64::from(*count),
            Rule::MinTotal { amount } => cart.subtotal_without_conditions() >= *amount,
            Rule::MaxTotal { amount } => cart.subtotal_without_conditions() <= *amount,
            Rule::HasCategory { category } => {
                any_or_context(cart, item, |i| item_category(i) == Some(category.as_str()))
            }
            Rule::HasItems { ids } => {
                any_or_context(cart, item, |i| ids.iter().any(|id| id == i.id()))
            }
            Rule::Vip => matches!(cart.metadata().get("vip"), Some(Value::Bool(true))),
            Rule::MinItemQuantity { quantity } => {
                any_or_context(cart, item, |i| i.quantity() >= *quantity)
            }
            Rule::MinItemPrice { amount } => {
                any_or_context(cart, item, |i| i.price() >= *amount)
            }
        }
    }
}

fn any_or_context(
    cart: &CartState,
    item: Option<&CartItem>,
    predicate: impl Fn(&CartItem) -> bool,
) -> bool {
    match item {
        Some(item) => predicate(item),
        None => cart.items().iter().any(predicate),
    }
}

fn item_category(item: &CartItem) -> Option<&str> {
    item.attributes().get("category").and_then(Value::as_str)
}
