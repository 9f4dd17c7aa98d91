//! Value objects

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{CartError, Result};

/// Money value object: an amount in minor currency units plus a currency
/// code. The pricing path works on raw `i64` minor units; `Money` is for
/// callers that need currency-tagged figures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: String,
}

impl Money {
    pub fn new(amount: i64, currency: &str) -> Self {
        Self {
            amount,
            currency: currency.to_string(),
        }
    }

    pub fn zero(currency: &str) -> Self {
        Self::new(0, currency)
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn add(&self, other: &Money) -> Result<Money> {
        if self.currency != other.currency {
            return Err(CartError::Validation(format!(
                "currency mismatch: {} vs {}",
                self.currency, other.currency
            )));
        }
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }

    pub fn multiply(&self, qty: u32) -> Money {
        Money::new(self.amount * i64::from(qty), &self.currency)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Round-half-up integer division, sign-aware: halves round away from zero.
/// Used once per percentage/factor conversion in the pricing path.
pub(crate) fn div_round_half_up(numerator: i128, denominator: i128) -> i64 {
    debug_assert!(denominator > 0);
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    let bump = if remainder.abs() * 2 >= denominator {
        numerator.signum()
    } else {
        0
    };
    (quotient + bump) as i64
}
