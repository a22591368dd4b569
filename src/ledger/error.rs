//! Ledger Error Types
//!
//! Every failure surfaced by the engine is a [`LedgerError`]. Variants are
//! granular for logging and API codes; [`LedgerError::kind`] folds them into
//! the coarse taxonomy callers branch on (retry, 404, 422, ...).

use rust_decimal::Decimal;
use thiserror::Error;

use crate::money::{BalanceAccount, MoneyError};

use super::types::BranchId;

/// Coarse error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or out-of-range input, rejected before any mutation
    Validation,
    /// Caller is outside the scope of the record it addresses
    Forbidden,
    NotFound,
    InsufficientFunds,
    /// Lock wait timeout, deadlock or serialization failure; safe to retry
    Conflict,
    /// Unique / foreign-key / check violation reported by the store
    DuplicateOrReferential,
    Internal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("{0} cannot be negative")]
    NegativeAmount(&'static str),

    #[error("Tax rate must be between 0 and 100, got {0}")]
    InvalidTaxRate(Decimal),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Unknown transaction status: {0}")]
    InvalidStatus(String),

    #[error("System Manager cannot receive transfers")]
    SystemManagerCannotReceive,

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    // === Scope Errors ===
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // === Lookup Errors ===
    #[error("Branch not found: {0}")]
    BranchNotFound(BranchId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    // === Funds ===
    #[error(
        "Insufficient funds in branch {branch}: available {available} {account}, requested {requested}"
    )]
    InsufficientFunds {
        branch: BranchId,
        account: BalanceAccount,
        available: Decimal,
        requested: Decimal,
    },

    // === Store Errors ===
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Duplicate or referential violation: {0}")]
    DuplicateOrReferential(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount
            | LedgerError::NegativeAmount(_)
            | LedgerError::InvalidTaxRate(_)
            | LedgerError::UnsupportedCurrency(_)
            | LedgerError::InvalidStatus(_)
            | LedgerError::SystemManagerCannotReceive
            | LedgerError::InvalidStateTransition(_) => ErrorKind::Validation,
            LedgerError::Forbidden(_) => ErrorKind::Forbidden,
            LedgerError::BranchNotFound(_) | LedgerError::TransactionNotFound(_) => {
                ErrorKind::NotFound
            }
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::DuplicateOrReferential(_) => ErrorKind::DuplicateOrReferential,
            LedgerError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount => "INVALID_AMOUNT",
            LedgerError::NegativeAmount(_) => "NEGATIVE_AMOUNT",
            LedgerError::InvalidTaxRate(_) => "INVALID_TAX_RATE",
            LedgerError::UnsupportedCurrency(_) => "UNSUPPORTED_CURRENCY",
            LedgerError::InvalidStatus(_) => "INVALID_STATUS",
            LedgerError::SystemManagerCannotReceive => "SYSTEM_MANAGER_CANNOT_RECEIVE",
            LedgerError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            LedgerError::Forbidden(_) => "FORBIDDEN",
            LedgerError::BranchNotFound(_) => "BRANCH_NOT_FOUND",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::DuplicateOrReferential(_) => "DUPLICATE_OR_REFERENTIAL",
            LedgerError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict | ErrorKind::DuplicateOrReferential => 409,
            ErrorKind::InsufficientFunds => 422,
            ErrorKind::Internal => 500,
        }
    }

    /// Only store conflicts are worth retrying unchanged
    #[inline]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<MoneyError> for LedgerError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::UnsupportedCurrency(c) => LedgerError::UnsupportedCurrency(c),
            MoneyError::TaxRateOutOfRange(r) => LedgerError::InvalidTaxRate(r),
        }
    }
}

/// SQLSTATEs that mean "another unit got there first"
const CONFLICT_SQLSTATES: [&str; 4] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available (lock_timeout)
    "57014", // query_canceled (statement_timeout)
];

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                let code = db.code();
                match code.as_deref() {
                    Some(c) if CONFLICT_SQLSTATES.contains(&c) => {
                        LedgerError::Conflict(e.to_string())
                    }
                    Some(c) if c.starts_with("23") => {
                        LedgerError::DuplicateOrReferential(e.to_string())
                    }
                    _ => LedgerError::Internal(e.to_string()),
                }
            }
            sqlx::Error::PoolTimedOut => LedgerError::Conflict(e.to_string()),
            _ => LedgerError::Internal(e.to_string()),
        }
    }
}
