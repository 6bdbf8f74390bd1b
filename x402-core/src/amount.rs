//! Token amounts in atomic units, and conversion from human prices.
//!
//! Requirements and authorizations carry amounts as decimal strings of the
//! token's smallest unit (`"10000"` is 0.01 USDC). [`TokenAmount`] parses those
//! strings into a `U256` so that comparisons are numeric rather than lexical.
//! [`MoneyAmount`] parses prices written for humans (`"$0.01"`, `"1,000"`).

use alloy_primitives::U256;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// An unsigned integer amount in a token's smallest unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TokenAmount(pub U256);

/// A string that is not a non-negative base-10 integer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("amount is not an unsigned integer: {0:?}")]
pub struct AmountParseError(String);

impl TokenAmount {
    /// The zero amount.
    #[must_use]
    pub const fn zero() -> Self {
        Self(U256::ZERO)
    }

    /// The amount as a 256-bit integer.
    #[must_use]
    pub const fn as_u256(&self) -> U256 {
        self.0
    }

    /// The amount as `u64`, or `None` when it does not fit.
    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        u64::try_from(self.0).ok()
    }
}

impl FromStr for TokenAmount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError(s.into()));
        }
        U256::from_str_radix(s, 10)
            .map(Self)
            .map_err(|_| AmountParseError(s.into()))
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl From<U256> for TokenAmount {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(serde::de::Error::custom)
    }
}

const MIN_PRICE: &str = "0.000000001";
const MAX_PRICE: &str = "999999999";

static PRICE_NOISE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"[^\d\.\-]+").ok());

/// A human-readable price such as `"$0.01"` or `"1,000"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoneyAmount(pub Decimal);

/// Rejections when reading a [`MoneyAmount`] or scaling it to a token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyAmountError {
    /// Not a decimal number.
    #[error("invalid number format")]
    InvalidFormat,
    /// Outside the accepted price range.
    #[error("amount must be between {MIN_PRICE} and {MAX_PRICE}")]
    OutOfRange,
    /// Below zero.
    #[error("negative value is not allowed")]
    Negative,
    /// More fractional digits than the token carries.
    #[error("price has {money} fractional digits but the token only has {token}")]
    WrongPrecision {
        /// Fractional digits in the price.
        money: u32,
        /// Decimals of the token.
        token: u32,
    },
}

impl MoneyAmount {
    /// Reads a price, ignoring currency symbols and thousands separators.
    ///
    /// # Errors
    ///
    /// Fails when the remaining text is not a number, is negative, or falls
    /// outside the supported range.
    pub fn parse(input: &str) -> Result<Self, MoneyAmountError> {
        let cleaned = PRICE_NOISE
            .as_ref()
            .map_or_else(|| input.to_owned(), |re| re.replace_all(input, "").into_owned());
        let parsed = Decimal::from_str(&cleaned).map_err(|_| MoneyAmountError::InvalidFormat)?;
        if parsed.is_sign_negative() {
            return Err(MoneyAmountError::Negative);
        }
        let min = Decimal::from_str(MIN_PRICE).map_err(|_| MoneyAmountError::InvalidFormat)?;
        let max = Decimal::from_str(MAX_PRICE).map_err(|_| MoneyAmountError::InvalidFormat)?;
        if parsed < min || parsed > max {
            return Err(MoneyAmountError::OutOfRange);
        }
        Ok(Self(parsed))
    }

    /// Scales the price to atomic units of a token with `decimals` decimals.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyAmountError::WrongPrecision`] when the price has more
    /// fractional digits than the token can represent.
    pub fn to_token_amount(&self, decimals: u32) -> Result<TokenAmount, MoneyAmountError> {
        let normalized = self.0.normalize();
        let scale = normalized.scale();
        if scale > decimals {
            return Err(MoneyAmountError::WrongPrecision {
                money: scale,
                token: decimals,
            });
        }
        let mantissa = U256::from(normalized.mantissa().unsigned_abs());
        let factor = U256::from(10u8).pow(U256::from(decimals - scale));
        Ok(TokenAmount(mantissa * factor))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}
