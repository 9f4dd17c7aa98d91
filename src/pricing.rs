//! Condition resolver / pricing engine
//!
//! A deterministic, pure function over a cart snapshot. Item conditions run
//! first on each line, then cart-level conditions partitioned by target:
//! subtotal-targeted conditions feed total-targeted ones. Equal `order`
//! values keep insertion order (the sort is stable), and every monetary
//! step stays in integer minor units.

use crate::domain::aggregates::cart::CartState;
use crate::domain::conditions::{Condition, Target};

/// Flags consulted during a pricing pass.
#[derive(Clone, Copy, Debug)]
pub struct PricingOptions {
    /// When false, conditions carrying the `is_global` attribute are
    /// skipped entirely.
    pub evaluate_global_conditions: bool,
}

impl Default for PricingOptions {
    fn default() -> Self {
        Self {
            evaluate_global_conditions: true,
        }
    }
}

/// All derived figures from one pricing pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Totals {
    /// Σ price × quantity, before any conditions.
    pub subtotal_without_conditions: i64,
    /// Σ per-line value after item-level conditions.
    pub subtotal: i64,
    /// Subtotal after cart-level conditions (subtotal target, then total
    /// target).
    pub total: i64,
    /// `subtotal_without_conditions - total`, floored at zero.
    pub savings: i64,
    /// Sum of unit quantities.
    pub quantity: u64,
    /// Unique item lines.
    pub count: usize,
}

/// Prices a cart snapshot. Calling this twice without a mutation in between
/// returns identical figures.
pub fn price(cart: &CartState, options: &PricingOptions) -> Totals {
    let mut subtotal_without_conditions = 0_i64;
    let mut subtotal = 0_i64;

    for item in cart.items() {
        let base = item.line_subtotal();
        subtotal_without_conditions += base;

        let mut running = base;
        for condition in by_order(item.conditions().iter()) {
            if applies(condition, cart, Some(item), options) {
                running = condition.apply(running);
            }
        }
        subtotal += running;
    }

    let mut total = subtotal;
    for target in [Target::Subtotal, Target::Total] {
        let staged = cart.conditions().iter().filter(|c| c.target() == target);
        for condition in by_order(staged) {
            if applies(condition, cart, None, options) {
                total = condition.apply(total);
            }
        }
    }

    Totals {
        subtotal_without_conditions,
        subtotal,
        total,
        savings: (subtotal_without_conditions - total).max(0),
        quantity: cart.total_quantity(),
        count: cart.count(),
    }
}

fn applies(
    condition: &Condition,
    cart: &CartState,
    item: Option<&crate::CartItem>,
    options: &PricingOptions,
) -> bool {
    if condition.is_global() && !options.evaluate_global_conditions {
        return false;
    }
    condition.is_active(cart, item)
}

/// Stable sort by `order`; equal orders keep insertion order.
fn by_order<'a>(conditions: impl Iterator<Item = &'a Condition>) -> Vec<&'a Condition> {
    let mut sorted: Vec<&Condition> = conditions.collect();
    sorted.sort_by_key(|c| c.order());
    sorted
}
