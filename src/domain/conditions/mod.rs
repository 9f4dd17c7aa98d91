//! Pricing conditions
//!
//! A [`Condition`] is a named pricing rule (tax, discount, fee, shipping)
//! applied at item, subtotal or total scope. The raw value expression is
//! parsed once at construction into an operator and a fixed-point operand,
//! so an unparseable expression can never enter the pricing pipeline.

pub mod rules;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::domain::value_objects::div_round_half_up;
use crate::{CartError, Result};
use rules::Rule;

/// Fixed-point scale for percentages and multiplicative factors:
/// `parsed_value` 10_000 == 100% == factor 1.0.
const FIXED_SCALE: i64 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Tax,
    Discount,
    Fee,
    Shipping,
    Custom,
}

/// Scope a condition applies at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Applied to a single item's running line value.
    Item,
    /// Applied to the cart subtotal, before total-targeted conditions.
    Subtotal,
    /// Applied to the running total, after subtotal-targeted conditions.
    Total,
}

/// How the parsed operand combines with the running amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// An immutable pricing rule. "Updating" a condition means replacing it by
/// name on the cart or item that holds it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    name: String,
    kind: ConditionType,
    target: Target,
    /// Raw value expression as supplied, kept for export/auditing.
    value: String,
    /// Derived once from `value` at construction.
    operator: Operator,
    /// Minor units for add/subtract amounts; fixed-point (scale 10_000)
    /// for percentages and multiplicative factors.
    parsed_value: i64,
    percentage: bool,
    order: i32,
    #[serde(default)]
    attributes: BTreeMap<String, Value>,
    #[serde(default)]
    rules: Vec<Rule>,
}

impl Condition {
    /// Parses the value expression and builds a condition. Fails with
    /// [`CartError::Validation`] on an unparseable expression, so corrupt
    /// conditions are rejected before they can reach evaluation.
    pub fn new(
        name: impl Into<String>,
        kind: ConditionType,
        target: Target,
        value: &str,
        order: i32,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CartError::Validation(
                "condition name must not be empty".into(),
            ));
        }
        let (operator, parsed_value, percentage) = parse_value(value)
            .map_err(|reason| CartError::Validation(format!("condition {name}: {reason}")))?;
        Ok(Self {
            name,
            kind,
            target,
            value: value.to_string(),
            operator,
            parsed_value,
            percentage,
            order,
            attributes: BTreeMap::new(),
            rules: Vec::new(),
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

    /// Attaches activation rules, making this a dynamic condition: it only
    /// participates in pricing while every rule holds.
    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ConditionType {
        self.kind
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn raw_value(&self) -> &str {
        &self.value
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn parsed_value(&self) -> i64 {
        self.parsed_value
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn is_percentage(&self) -> bool {
        self.percentage
    }

    /// Adds to the amount it is applied to.
    pub fn is_charge(&self) -> bool {
        matches!(self.operator, Operator::Add)
            || (self.operator == Operator::Multiply && self.parsed_value > FIXED_SCALE)
    }

    /// Reduces the amount it is applied to.
    pub fn is_discount(&self) -> bool {
        matches!(self.operator, Operator::Subtract | Operator::Divide)
            || (self.operator == Operator::Multiply && self.parsed_value < FIXED_SCALE)
    }

    /// Carries activation rules re-evaluated on every mutation.
    pub fn is_dynamic(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Marked global via the `is_global` attribute; such conditions can be
    /// switched off wholesale in configuration.
    pub fn is_global(&self) -> bool {
        matches!(self.attributes.get("is_global"), Some(Value::Bool(true)))
    }

    /// Applies the condition to a running amount in minor units. Rounding
    /// (half up) happens exactly once, at the fixed-point conversion.
    pub fn apply(&self, amount: i64) -> i64 {
        let amount_wide = i128::from(amount);
        let operand = i128::from(self.parsed_value);
        match (self.operator, self.percentage) {
            (Operator::Add, true) => {
                amount + div_round_half_up(amount_wide * operand, i128::from(FIXED_SCALE))
            }
            (Operator::Subtract, true) => {
                amount - div_round_half_up(amount_wide * operand, i128::from(FIXED_SCALE))
            }
            (Operator::Add, false) => amount + self.parsed_value,
            (Operator::Subtract, false) => amount - self.parsed_value,
            (Operator::Multiply, _) => div_round_half_up(amount_wide * operand, i128::from(FIXED_SCALE)),
            (Operator::Divide, _) => {
                div_round_half_up(amount_wide * i128::from(FIXED_SCALE), operand)
            }
        }
    }

    /// Whether the condition participates in pricing for the given cart
    /// snapshot. Non-dynamic conditions are always active; dynamic ones
    /// require every rule to hold.
    pub fn is_active(
        &self,
        cart: &crate::CartState,
        item: Option<&crate::CartItem>,
    ) -> bool {
        self.rules.iter().all(|rule| rule.evaluate(cart, item))
    }
}

/// Parses a raw value expression into (operator, operand, is_percentage).
///
/// Accepted forms: `"500"`, `"+500"`, `"-200"` (minor units), `"10%"`,
/// `"-15%"`, `"+12.5%"` (percentage deltas, up to 2 decimals), `"*1.5"`,
/// `"/2"` (factors, up to 4 decimals).
fn parse_value(raw: &str) -> std::result::Result<(Operator, i64, bool), String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty value expression".into());
    }

    let (operator, body) = match raw.as_bytes()[0] {
        b'+' => (Operator::Add, &raw[1..]),
        b'-' => (Operator::Subtract, &raw[1..]),
        b'*' => (Operator::Multiply, &raw[1..]),
        b'/' => (Operator::Divide, &raw[1..]),
        _ => (Operator::Add, raw),
    };

    let percentage = body.ends_with('%');
    let body = body.strip_suffix('%').unwrap_or(body);

    if percentage && matches!(operator, Operator::Multiply | Operator::Divide) {
        return Err(format!("percentage cannot combine with {raw:?}"));
    }

    // Amounts stay in minor units. Percentages parse in hundredths of a
    // percent and factors in ten-thousandths, so both land on the shared
    // scale where 10_000 == 100% == factor 1.0.
    let operand = if percentage {
        parse_fixed(body, 2)
    } else if matches!(operator, Operator::Multiply | Operator::Divide) {
        parse_fixed(body, 4)
    } else {
        parse_fixed(body, 0)
    }
    .ok_or_else(|| format!("unparseable value expression {raw:?}"))?;

    if operator == Operator::Divide && operand == 0 {
        return Err("division by zero".into());
    }

    Ok((operator, operand, percentage))
}

/// Parses a non-negative decimal into an integer scaled by 10^scale_digits,
/// rejecting more fractional digits than the scale allows. No floats.
fn parse_fixed(body: &str, scale_digits: u32) -> Option<i64> {
    if body.is_empty() {
        return None;
    }
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    if scale_digits == 0 && !frac_part.is_empty() {
        return None;
    }
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if frac_part.len() as u32 > scale_digits {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit())
        || !frac_part.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }

    let scale = 10_i64.checked_pow(scale_digits)?;
    let int_value: i64 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    let mut frac_value: i64 = if frac_part.is_empty() {
        0
    } else {
        frac_part.parse().ok()?
    };
    frac_value *= 10_i64.pow(scale_digits - frac_part.len() as u32);

    int_value.checked_mul(scale)?.checked_add(frac_value)
}
