//! Direct branch funding by a director
//!
//! Allocations and deductions move a single branch balance and write one
//! signed fund record. Deductions respect the balance floor; a full reset
//! zeroes a balance and books the zeroed amount as a deduction so the
//! history still sums to the balance.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::money::{BalanceAccount, Currency, TaxRate};

use super::cache::{CacheInvalidator, CacheKeys};
use super::error::LedgerError;
use super::store::{LedgerStore, LedgerUnit, commit_or_rollback};
use super::types::{
    Actor, Branch, BranchId, FundHistoryRecord, FundKind, LockMode, NewFundRecord,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationOp {
    Allocation,
    Deduction,
}

impl AllocationOp {
    pub fn kind(&self) -> FundKind {
        match self {
            AllocationOp::Allocation => FundKind::Allocation,
            AllocationOp::Deduction => FundKind::Deduction,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            AllocationOp::Allocation => "Allocation",
            AllocationOp::Deduction => "Deduction",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentOutcome {
    pub record: FundHistoryRecord,
    pub new_balance: Decimal,
}

pub struct AllocationDesk {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn CacheInvalidator>,
}

fn require_director(actor: &Actor, action: &str) -> Result<(), LedgerError> {
    if actor.is_director() {
        Ok(())
    } else {
        Err(LedgerError::Forbidden(format!(
            "director access required to {}",
            action
        )))
    }
}

impl AllocationDesk {
    pub fn new(store: Arc<dyn LedgerStore>, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { store, cache }
    }

    /// Add to or take from one balance of `branch_id`.
    ///
    /// `currency` must be `SYP` or `USD` (any case). Without a description
    /// the record reads "<Allocation|Deduction> by user <id> (<CUR>)".
    pub async fn adjust_allocation(
        &self,
        branch_id: BranchId,
        amount: Decimal,
        op: AllocationOp,
        currency: &str,
        description: Option<String>,
        actor: &Actor,
    ) -> Result<AdjustmentOutcome, LedgerError> {
        let checked = require_director(actor, "adjust allocations").and_then(|_| {
            if amount <= Decimal::ZERO {
                return Err(LedgerError::InvalidAmount);
            }
            Ok(Currency::parse_adjustable(currency)?)
        });
        let currency = checked.inspect_err(|e| {
            warn!(branch = branch_id, op = ?op, error = %e, "Adjustment rejected");
        })?;

        let description = description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("{} by user {} ({})", op.label(), actor.user_id, currency));

        let mut unit = self.store.begin().await?;
        let result =
            Self::apply_adjustment(unit.as_mut(), branch_id, amount, op, currency, description)
                .await;
        let outcome = commit_or_rollback(unit, result).await.inspect_err(|e| {
            warn!(branch = branch_id, op = ?op, error = %e, "Adjustment rejected");
        })?;

        info!(
            branch = branch_id,
            op = ?op,
            amount = %amount,
            currency = %currency,
            new_balance = %outcome.new_balance,
            user = actor.user_id,
            "Branch allocation adjusted"
        );
        CacheKeys::new().branch(branch_id).send(self.cache.as_ref());

        Ok(outcome)
    }

    async fn apply_adjustment(
        unit: &mut dyn LedgerUnit,
        branch_id: BranchId,
        amount: Decimal,
        op: AllocationOp,
        currency: Currency,
        description: String,
    ) -> Result<AdjustmentOutcome, LedgerError> {
        let account = currency.account();
        let branch = unit
            .branch(branch_id, LockMode::ForUpdate)
            .await?
            .ok_or(LedgerError::BranchNotFound(branch_id))?;

        let delta = match op {
            AllocationOp::Allocation => amount,
            AllocationOp::Deduction => {
                let available = branch.balance(account);
                if available < amount {
                    return Err(LedgerError::InsufficientFunds {
                        branch: branch_id,
                        account,
                        available,
                        requested: amount,
                    });
                }
                -amount
            }
        };

        let new_balance = unit.adjust_balance(branch_id, account, delta).await?;
        let record = unit
            .append_fund_record(&NewFundRecord {
                branch_id,
                amount: delta,
                kind: op.kind(),
                currency,
                description,
            })
            .await?;

        Ok(AdjustmentOutcome {
            record,
            new_balance,
        })
    }

    /// Zero one balance (`Some("SYP" | "USD")`) or both (`None`).
    ///
    /// Returns one deduction record per balance that was non-zero.
    pub async fn reset_allocations(
        &self,
        branch_id: BranchId,
        currency: Option<&str>,
        actor: &Actor,
    ) -> Result<Vec<FundHistoryRecord>, LedgerError> {
        require_director(actor, "reset allocations")?;
        let accounts: Vec<BalanceAccount> = match currency {
            Some(c) => vec![Currency::parse_adjustable(c)?.account()],
            None => BalanceAccount::ALL.to_vec(),
        };

        let mut unit = self.store.begin().await?;
        let result = Self::apply_reset(unit.as_mut(), branch_id, &accounts).await;
        let records = commit_or_rollback(unit, result).await?;

        info!(
            branch = branch_id,
            accounts = ?accounts,
            records = records.len(),
            user = actor.user_id,
            "Branch allocations reset"
        );
        CacheKeys::new().branch(branch_id).send(self.cache.as_ref());

        Ok(records)
    }

    async fn apply_reset(
        unit: &mut dyn LedgerUnit,
        branch_id: BranchId,
        accounts: &[BalanceAccount],
    ) -> Result<Vec<FundHistoryRecord>, LedgerError> {
        let branch = unit
            .branch(branch_id, LockMode::ForUpdate)
            .await?
            .ok_or(LedgerError::BranchNotFound(branch_id))?;

        let mut records = Vec::new();
        for &account in accounts {
            let balance = branch.balance(account);
            if balance <= Decimal::ZERO {
                continue;
            }
            unit.adjust_balance(branch_id, account, -balance).await?;
            let record = unit
                .append_fund_record(&NewFundRecord {
                    branch_id,
                    amount: -balance,
                    kind: FundKind::Deduction,
                    currency: account.currency(),
                    description: format!("Full {} balance reset by director", account),
                })
                .await?;
            records.push(record);
        }
        Ok(records)
    }

    /// Change the rate applied to future transfers from `branch_id`.
    /// Existing transactions keep the rate captured when they were created.
    pub async fn set_tax_rate(
        &self,
        branch_id: BranchId,
        rate: Decimal,
        actor: &Actor,
    ) -> Result<Branch, LedgerError> {
        require_director(actor, "edit tax rates")?;
        let rate = TaxRate::new(rate)?;

        let mut unit = self.store.begin().await?;
        let result = Self::apply_tax_rate(unit.as_mut(), branch_id, rate).await;
        let branch = commit_or_rollback(unit, result).await?;

        info!(branch = branch_id, tax_rate = %rate, user = actor.user_id, "Branch tax rate updated");
        CacheKeys::new().branch(branch_id).send(self.cache.as_ref());

        Ok(branch)
    }

    async fn apply_tax_rate(
        unit: &mut dyn LedgerUnit,
        branch_id: BranchId,
        rate: TaxRate,
    ) -> Result<Branch, LedgerError> {
        let mut branch = unit
            .branch(branch_id, LockMode::ForUpdate)
            .await?
            .ok_or(LedgerError::BranchNotFound(branch_id))?;
        unit.set_tax_rate(branch_id, rate.percent()).await?;
        branch.tax_rate = rate.percent();
        Ok(branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_kinds() {
        assert_eq!(AllocationOp::Allocation.kind(), FundKind::Allocation);
        assert_eq!(AllocationOp::Deduction.kind(), FundKind::Deduction);
    }

    #[test]
    fn test_only_directors() {
        assert!(require_director(&Actor::director(1), "x").is_ok());
        let err = require_director(&Actor::branch_manager(2, 1), "x").unwrap_err();
        assert_eq!(err.http_status(), 403);
    }
}
