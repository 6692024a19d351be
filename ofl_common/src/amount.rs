use std::{fmt::Display, iter::Sum, ops::Add, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

pub const DEFAULT_CURRENCY_CODE: &str = "RUB";

/// Two amounts closer than this are the same amount. Gateways report prices as
/// decimal strings and the storefront does float arithmetic, so exact
/// comparisons at the cent level produce false negatives.
pub const CURRENCY_EPSILON: f64 = 0.01;

//--------------------------------------      Amount       -----------------------------------------------------------
/// A currency amount in major units (roubles, not kopeks).
///
/// Equality is epsilon-tolerant. Ordering-style checks go through
/// [`Amount::exceeds`] and [`Amount::covers`] so that ledger guards share a
/// single notion of "greater than" at the cent level.
#[derive(Debug, Clone, Copy, Default, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Amount(f64);

op!(binary Amount, Add, add);
op!(binary Amount, Sub, sub);
op!(inplace Amount, AddAssign, add_assign);
op!(inplace Amount, SubAssign, sub_assign);
op!(unary Amount, Neg, neg);

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error)]
#[error("Value is not a valid currency amount: {0}")]
pub struct AmountParseError(String);

impl From<f64> for Amount {
    fn from(value: f64) -> Self {
        Self(value)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(value as f64)
    }
}

impl PartialEq for Amount {
    fn eq(&self, other: &Self) -> bool {
        (self.0 - other.0).abs() < CURRENCY_EPSILON
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().parse::<f64>().map_err(|e| AmountParseError(format!("{s}. {e}")))?;
        if !value.is_finite() {
            return Err(AmountParseError(s.to_string()));
        }
        Ok(Self(value))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Amount {
    pub const ZERO: Amount = Amount(0.0);

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_approx_zero(&self) -> bool {
        self.0.abs() < CURRENCY_EPSILON
    }

    /// `self` is greater than `other` by more than the cent-level epsilon.
    pub fn exceeds(&self, other: Amount) -> bool {
        self.0 > other.0 + CURRENCY_EPSILON
    }

    /// `self` is at least `other`, allowing the cent-level epsilon.
    pub fn covers(&self, other: Amount) -> bool {
        self.0 + CURRENCY_EPSILON > other.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn epsilon_equality() {
        assert_eq!(Amount::from(1000.0), Amount::from(1000.0001));
        assert_ne!(Amount::from(1000.0), Amount::from(1000.02));
        // the classic float trap: 0.1 + 0.2
        assert_eq!(Amount::from(0.1) + Amount::from(0.2), Amount::from(0.3));
    }

    #[test]
    fn guards() {
        let total = Amount::from(1000.0);
        assert!(!Amount::from(1000.005).exceeds(total));
        assert!(Amount::from(1000.02).exceeds(total));
        assert!(Amount::from(999.995).covers(total));
        assert!(!Amount::from(999.9).covers(total));
        assert!((Amount::from(500.0) - Amount::from(500.0)).is_approx_zero());
    }

    #[test]
    fn arithmetic_and_parse() {
        let a: Amount = "100.50".parse().unwrap();
        let b: Amount = "0.50".parse().unwrap();
        assert_eq!(a - b, Amount::from(100.0));
        assert_eq!(-b, Amount::from(-0.5));
        assert_eq!(vec![a, b].into_iter().sum::<Amount>(), Amount::from(101.0));
        assert!("12,50".parse::<Amount>().is_err());
        assert!("nan".parse::<Amount>().is_err());
        assert_eq!(format!("{}", Amount::from(7.5)), "7.50");
    }
}
