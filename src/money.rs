//! Money Module
//!
//! Currency labels, balance accounts and tax arithmetic. All monetary values
//! are `rust_decimal::Decimal`; no floating point is involved anywhere.
//!
//! ## Currencies
//! A branch holds two independent balances (SYP and USD). Transactions may
//! also carry the legacy Syrian-pound label written by older clients; it is
//! booked against the SYP balance.
//!
//! ## Usage
//! ```rust
//! use fund_ledger::money::{BalanceAccount, Currency, TaxRate};
//! use rust_decimal::Decimal;
//!
//! let currency: Currency = "usd".parse().unwrap();
//! assert_eq!(currency.account(), BalanceAccount::Usd);
//!
//! let rate = TaxRate::new(Decimal::from(10)).unwrap();
//! assert_eq!(rate.tax_on(Decimal::from(50)), Decimal::from(5));
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Label stored by legacy clients for Syrian pounds.
pub const LEGACY_SYP_LABEL: &str = "ليرة سورية";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Tax rate must be between 0 and 100, got {0}")]
    TaxRateOutOfRange(Decimal),
}

// ============================================================================
// Currency
// ============================================================================

/// Currency attached to a transfer or a fund movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Currency {
    #[serde(rename = "SYP")]
    Syp,
    #[serde(rename = "USD")]
    Usd,
    /// Legacy label, booked as SYP
    #[default]
    #[serde(rename = "ليرة سورية")]
    LegacySyp,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Syp => "SYP",
            Currency::Usd => "USD",
            Currency::LegacySyp => LEGACY_SYP_LABEL,
        }
    }

    /// Balance this currency debits and credits.
    ///
    /// Anything that is not USD falls back to the SYP balance.
    #[inline]
    pub fn account(&self) -> BalanceAccount {
        match self {
            Currency::Usd => BalanceAccount::Usd,
            Currency::Syp | Currency::LegacySyp => BalanceAccount::Syp,
        }
    }

    /// Parse a currency accepted for direct allocation adjustments.
    ///
    /// Only `SYP` and `USD` are accepted (case-insensitive); the legacy
    /// label is rejected here.
    pub fn parse_adjustable(s: &str) -> Result<Self, MoneyError> {
        match s.trim().to_uppercase().as_str() {
            "SYP" => Ok(Currency::Syp),
            "USD" => Ok(Currency::Usd),
            _ => Err(MoneyError::UnsupportedCurrency(s.to_string())),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed == LEGACY_SYP_LABEL {
            return Ok(Currency::LegacySyp);
        }
        Currency::parse_adjustable(trimmed)
    }
}

// ============================================================================
// Balance Account
// ============================================================================

/// One of the two balances held by every branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BalanceAccount {
    Syp,
    Usd,
}

impl BalanceAccount {
    pub const ALL: [BalanceAccount; 2] = [BalanceAccount::Syp, BalanceAccount::Usd];

    /// Canonical currency for records written against this account
    pub fn currency(&self) -> Currency {
        match self {
            BalanceAccount::Syp => Currency::Syp,
            BalanceAccount::Usd => Currency::Usd,
        }
    }

    /// Column holding this balance in `branches`
    pub fn column(&self) -> &'static str {
        match self {
            BalanceAccount::Syp => "balance_syp",
            BalanceAccount::Usd => "balance_usd",
        }
    }
}

impl fmt::Display for BalanceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.currency().as_str())
    }
}

// ============================================================================
// Tax
// ============================================================================

/// Percentage in [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct TaxRate(Decimal);

impl TaxRate {
    pub const ZERO: TaxRate = TaxRate(Decimal::ZERO);

    pub fn new(percent: Decimal) -> Result<Self, MoneyError> {
        if percent < Decimal::ZERO || percent > Decimal::ONE_HUNDRED {
            return Err(MoneyError::TaxRateOutOfRange(percent));
        }
        Ok(Self(percent))
    }

    #[inline]
    pub fn percent(&self) -> Decimal {
        self.0
    }

    /// `base × rate / 100`
    #[inline]
    pub fn tax_on(&self, base: Decimal) -> Decimal {
        base * self.0 / Decimal::ONE_HUNDRED
    }
}

impl fmt::Display for TaxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
