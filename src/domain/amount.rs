//! Credit quantities
//!
//! Domain primitives for carbon credit quantities. Credits are held as a
//! fixed-point integer count of ten-thousandths, so every add, subtract and
//! comparison is exact. Conversion from `Decimal` or text is the only place
//! rounding happens (half-up, 4 places).

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Neg;
use std::str::FromStr;

/// Number of fractional digits carried by every credit quantity
pub const SCALE: u32 = 4;

/// Minor units per whole credit (10^SCALE)
pub const UNITS_PER_CREDIT: i64 = 10_000;

/// Largest magnitude a stored quantity may hold: 99,999,999.9999 credits,
/// the capacity of a `NUMERIC(12,4)` column.
const MAX_UNITS: i64 = 999_999_999_999;

/// Errors that can occur when creating a credit quantity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("Amount must be positive (got {0})")]
    NotPositive(Credits),

    #[error("Balance cannot be negative (got {0})")]
    Negative(Credits),

    #[error("Amount exceeds maximum allowed value (99999999.9999)")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    ParseError(String),
}

/// A signed fixed-point credit quantity with 4 fractional digits.
///
/// `Credits` is the raw arithmetic type used for ledger deltas, which may be
/// negative. Use [`Amount`] for operation inputs and [`Balance`] for wallet
/// fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Credits(i64);

impl Credits {
    pub const ZERO: Credits = Credits(0);

    /// Build from minor units (ten-thousandths of a credit)
    pub const fn from_units(units: i64) -> Self {
        Self(units)
    }

    /// Build from whole credits
    pub fn from_whole(credits: i64) -> Result<Self, AmountError> {
        credits
            .checked_mul(UNITS_PER_CREDIT)
            .filter(|units| units.abs() <= MAX_UNITS)
            .map(Self)
            .ok_or(AmountError::Overflow)
    }

    /// Convert a decimal, rounding half-up to 4 places.
    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        let mut rounded = value.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(SCALE);

        let units = i64::try_from(rounded.mantissa()).map_err(|_| AmountError::Overflow)?;
        if units.abs() > MAX_UNITS {
            return Err(AmountError::Overflow);
        }
        Ok(Self(units))
    }

    /// Minor units (ten-thousandths)
    pub fn units(&self) -> i64 {
        self.0
    }

    /// Exact decimal representation with scale 4
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, SCALE)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn abs(&self) -> Credits {
        Credits(self.0.abs())
    }

    pub fn checked_add(&self, other: Credits) -> Option<Credits> {
        self.0
            .checked_add(other.0)
            .filter(|units| units.abs() <= MAX_UNITS)
            .map(Credits)
    }

    pub fn checked_sub(&self, other: Credits) -> Option<Credits> {
        self.0
            .checked_sub(other.0)
            .filter(|units| units.abs() <= MAX_UNITS)
            .map(Credits)
    }
}

impl Neg for Credits {
    type Output = Credits;

    fn neg(self) -> Self::Output {
        Credits(-self.0)
    }
}

impl fmt::Display for Credits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let units = self.0.unsigned_abs();
        let per = UNITS_PER_CREDIT as u64;
        write!(f, "{}{}.{:04}", sign, units / per, units % per)
    }
}

impl FromStr for Credits {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal = Decimal::from_str(s.trim())
            .map_err(|e| AmountError::ParseError(e.to_string()))?;
        Credits::from_decimal(decimal)
    }
}

impl TryFrom<String> for Credits {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Credits::from_str(&value)
    }
}

impl From<Credits> for String {
    fn from(credits: Credits) -> Self {
        credits.to_string()
    }
}

impl std::iter::Sum for Credits {
    /// Saturates at the representable range; callers summing ledgers compare
    /// against stored balances that can never exceed it.
    fn sum<I: Iterator<Item = Credits>>(iter: I) -> Self {
        Credits(iter.fold(0i64, |acc, c| acc.saturating_add(c.0)))
    }
}

/// Amount represents a validated, strictly positive credit quantity.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - Exactly 4 decimal places (inputs are rounded half-up)
/// - Maximum value is 99,999,999.9999 credits
///
/// # Example
/// ```
/// use carbon_ledger::domain::Amount;
///
/// let amount: Amount = "10.5".parse().unwrap();
/// assert_eq!(amount.to_string(), "10.5000");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Credits);

impl Amount {
    /// Smallest representable positive amount (0.0001)
    pub const MIN: Amount = Amount(Credits::from_units(1));

    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    pub fn new(value: Credits) -> Result<Self, AmountError> {
        if !value.is_positive() {
            return Err(AmountError::NotPositive(value));
        }
        Ok(Self(value))
    }

    /// Create an Amount from a decimal, rounding to 4 places first.
    pub fn from_decimal(value: Decimal) -> Result<Self, AmountError> {
        Self::new(Credits::from_decimal(value)?)
    }

    /// Create an Amount from whole credits.
    pub fn from_whole(value: i64) -> Result<Self, AmountError> {
        Self::new(Credits::from_whole(value)?)
    }

    pub fn credits(&self) -> Credits {
        self.0
    }

    pub fn to_decimal(&self) -> Decimal {
        self.0.to_decimal()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::new(Credits::from_str(s)?)
    }
}

impl TryFrom<String> for Amount {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Amount::from_str(&value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

/// Balance represents a wallet balance field (zero or positive).
/// Unlike Amount, Balance can be zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Balance(Credits);

impl Balance {
    /// Create a new balance (zero or positive)
    pub fn new(value: Credits) -> Result<Self, AmountError> {
        if value.is_negative() {
            return Err(AmountError::Negative(value));
        }
        Ok(Self(value))
    }

    /// Create a zero balance
    pub fn zero() -> Self {
        Self(Credits::ZERO)
    }

    pub fn credits(&self) -> Credits {
        self.0
    }

    pub fn to_decimal(&self) -> Decimal {
        self.0.to_decimal()
    }

    /// Check if balance covers the amount
    pub fn is_sufficient_for(&self, amount: &Amount) -> bool {
        self.0 >= amount.credits()
    }

    /// Add amount to balance
    pub fn credit(&self, amount: &Amount) -> Result<Balance, AmountError> {
        let value = self
            .0
            .checked_add(amount.credits())
            .ok_or(AmountError::Overflow)?;
        Balance::new(value)
    }

    /// Subtract amount from balance
    pub fn debit(&self, amount: &Amount) -> Result<Balance, AmountError> {
        let value = self
            .0
            .checked_sub(amount.credits())
            .ok_or(AmountError::Overflow)?;
        Balance::new(value)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl TryFrom<String> for Balance {
    type Error = AmountError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Balance::new(Credits::from_str(&value)?)
    }
}

impl From<Balance> for String {
    fn from(balance: Balance) -> Self {
        balance.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_credits_display_pads_four_places() {
        assert_eq!(Credits::from_units(100_000).to_string(), "10.0000");
        assert_eq!(Credits::from_units(1).to_string(), "0.0001");
        assert_eq!(Credits::from_units(-60_000).to_string(), "-6.0000");
        assert_eq!(Credits::from_units(-5).to_string(), "-0.0005");
    }

    #[test]
    fn test_credits_round_half_up() {
        assert_eq!(Credits::from_decimal(dec!(1.00005)).unwrap().units(), 10_001);
        assert_eq!(Credits::from_decimal(dec!(1.00004)).unwrap().units(), 10_000);
        assert_eq!(Credits::from_decimal(dec!(-1.00005)).unwrap().units(), -10_001);
    }

    #[test]
    fn test_credits_parse() {
        let credits: Credits = "123.456".parse().unwrap();
        assert_eq!(credits.units(), 1_234_560);
        assert_eq!(credits.to_decimal(), dec!(123.4560));

        assert!(matches!("abc".parse::<Credits>(), Err(AmountError::ParseError(_))));
    }

    #[test]
    fn test_credits_overflow() {
        assert!(matches!(
            "100000000".parse::<Credits>(),
            Err(AmountError::Overflow)
        ));
        assert!("99999999.9999".parse::<Credits>().is_ok());

        let max = Credits::from_units(MAX_UNITS);
        assert!(max.checked_add(Credits::from_units(1)).is_none());
    }

    #[test]
    fn test_credits_arithmetic_is_exact() {
        // 0.1 + 0.2 == 0.3 exactly
        let a: Credits = "0.1".parse().unwrap();
        let b: Credits = "0.2".parse().unwrap();
        let c: Credits = "0.3".parse().unwrap();
        assert_eq!(a.checked_add(b), Some(c));
    }

    #[test]
    fn test_amount_zero_rejected() {
        let amount = Amount::new(Credits::ZERO);
        assert!(matches!(amount, Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_negative_rejected() {
        assert!(matches!("-1".parse::<Amount>(), Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_rounding_to_zero_rejected() {
        // Rounds to 0.0000
        assert!(matches!("0.00004".parse::<Amount>(), Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_serde_as_string() {
        let amount = Amount::from_whole(10).unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, r#""10.0000""#);

        let back: Amount = serde_json::from_str(r#""2.5""#).unwrap();
        assert_eq!(back.credits().units(), 25_000);
    }

    #[test]
    fn test_balance_credit_debit() {
        let balance = Balance::zero();
        let amount = Amount::from_whole(100).unwrap();

        let balance = balance.credit(&amount).unwrap();
        assert_eq!(balance.to_string(), "100.0000");

        let withdraw = Amount::from_whole(30).unwrap();
        let balance = balance.debit(&withdraw).unwrap();
        assert_eq!(balance.to_string(), "70.0000");
    }

    #[test]
    fn test_balance_insufficient() {
        let balance = Balance::new(Credits::from_units(500_000)).unwrap();
        let amount = Amount::from_whole(100).unwrap();

        assert!(!balance.is_sufficient_for(&amount));
        assert!(matches!(balance.debit(&amount), Err(AmountError::Negative(_))));
    }

    #[test]
    fn test_sum_of_credits() {
        let total: Credits = vec![
            Credits::from_units(100_000),
            Credits::from_units(-40_000),
            Credits::from_units(5),
        ]
        .into_iter()
        .sum();
        assert_eq!(total.to_string(), "6.0005");
    }
}
