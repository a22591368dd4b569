//! Persistence Seam
//!
//! The engine never talks to a database directly. It opens a [`LedgerUnit`]
//! (one all-or-nothing unit of work) from a [`LedgerStore`], performs locked
//! reads and writes through it, then commits or rolls back.
//!
//! # Contract
//!
//! - A unit that is dropped without `commit` must leave no trace.
//! - `LockMode::ForUpdate` lookups hold an exclusive row lock until the unit
//!   ends. Waiting longer than the store's lock timeout fails with
//!   `LedgerError::Conflict`.
//! - `adjust_balance` must refuse to leave a balance below zero, reporting a
//!   `DuplicateOrReferential` (check constraint) error. The engine checks the
//!   floor first; this is the storage backstop.
//! - Reads on the store itself take no locks and may be stale.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::money::BalanceAccount;

use super::error::LedgerError;
use super::state::{NotificationStatus, TransactionStatus};
use super::types::{
    Branch, BranchId, FundHistoryRecord, LockMode, NewFundRecord, NewNotification,
    NewProfitRecord, Notification, ProfitRecord, Receipt, ReceiptConfirmation, Transaction,
    TransactionId,
};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Open a new atomic unit
    async fn begin(&self) -> Result<Box<dyn LedgerUnit>, LedgerError>;

    async fn branch(&self, id: BranchId) -> Result<Option<Branch>, LedgerError>;

    async fn branches(&self) -> Result<Vec<Branch>, LedgerError>;

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError>;

    /// Newest first
    async fn fund_history(&self, branch: BranchId) -> Result<Vec<FundHistoryRecord>, LedgerError>;

    /// Every record of every branch, oldest first
    async fn all_fund_history(&self) -> Result<Vec<FundHistoryRecord>, LedgerError>;

    async fn profits_for_branch(&self, branch: BranchId) -> Result<Vec<ProfitRecord>, LedgerError>;

    async fn profits_for_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Vec<ProfitRecord>, LedgerError>;

    async fn notification(&self, id: TransactionId) -> Result<Option<Notification>, LedgerError>;
}

/// One atomic unit of work
#[async_trait]
pub trait LedgerUnit: Send {
    async fn branch(
        &mut self,
        id: BranchId,
        lock: LockMode,
    ) -> Result<Option<Branch>, LedgerError>;

    /// Add `delta` (may be negative) to one balance; returns the new balance
    async fn adjust_balance(
        &mut self,
        id: BranchId,
        account: BalanceAccount,
        delta: Decimal,
    ) -> Result<Decimal, LedgerError>;

    async fn set_tax_rate(&mut self, id: BranchId, tax_rate: Decimal) -> Result<(), LedgerError>;

    async fn transaction(
        &mut self,
        id: TransactionId,
        lock: LockMode,
    ) -> Result<Option<Transaction>, LedgerError>;

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), LedgerError>;

    async fn update_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<(), LedgerError>;

    async fn update_receipt(
        &mut self,
        confirmation: &ReceiptConfirmation,
        receipt: &Receipt,
    ) -> Result<(), LedgerError>;

    async fn append_fund_record(
        &mut self,
        record: &NewFundRecord,
    ) -> Result<FundHistoryRecord, LedgerError>;

    async fn insert_profit(&mut self, record: &NewProfitRecord)
    -> Result<ProfitRecord, LedgerError>;

    /// Returns the number of rows removed
    async fn delete_profits(&mut self, id: TransactionId) -> Result<u64, LedgerError>;

    async fn insert_notification(
        &mut self,
        notification: &NewNotification,
    ) -> Result<(), LedgerError>;

    /// Returns the number of notifications updated (0 if none is linked)
    async fn set_notification_status(
        &mut self,
        id: TransactionId,
        status: NotificationStatus,
    ) -> Result<u64, LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError>;
}

/// Commit the unit if `result` is Ok, otherwise roll it back and surface the
/// original error. A failed rollback is logged, never returned in place of
/// the original error.
pub async fn commit_or_rollback<T>(
    unit: Box<dyn LedgerUnit>,
    result: Result<T, LedgerError>,
) -> Result<T, LedgerError> {
    match result {
        Ok(value) => {
            unit.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = unit.rollback().await {
                tracing::error!(
                    error = %e,
                    rollback_error = %rollback_err,
                    "Rollback failed after ledger error"
                );
            }
            Err(e)
        }
    }
}
