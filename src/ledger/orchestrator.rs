//! Transfer Orchestrator
//!
//! Entry point for moving money between branches. A transfer is one atomic
//! unit:
//!
//! 1. lock every branch involved, in ascending id order
//! 2. check the sender (existence, balance floor), then the destination
//! 3. debit the sender and credit the destination, one fund record each
//! 4. insert the transaction (`processing`) and a pending notification
//!
//! Tax is always taken from the sending branch's current rate; request tax
//! fields are advisory.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use crate::money::TaxRate;

use super::cache::{CacheInvalidator, CacheKeys};
use super::error::{ErrorKind, LedgerError};
use super::state::TransactionStatus;
use super::store::{LedgerStore, LedgerUnit, commit_or_rollback};
use super::types::{
    Actor, Branch, BranchId, FundKind, FundSource, LockMode, NewFundRecord, NewNotification,
    SYSTEM_MANAGER_ID, Transaction, TransactionId, TransferRequest,
};

pub struct TransferOrchestrator {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn CacheInvalidator>,
}

impl TransferOrchestrator {
    pub fn new(store: Arc<dyn LedgerStore>, cache: Arc<dyn CacheInvalidator>) -> Self {
        Self { store, cache }
    }

    /// Create a transfer from `source_branch_id` (0 = System Manager)
    pub async fn initiate_transfer(
        &self,
        request: TransferRequest,
        source_branch_id: BranchId,
        initiator: &Actor,
    ) -> Result<TransactionId, LedgerError> {
        let source = FundSource::from_branch_id(source_branch_id);

        if let Err(e) = Self::validate(&request) {
            warn!(source = %source, error = %e, "Transfer rejected");
            return Err(e);
        }

        let mut unit = self.store.begin().await?;
        let result = Self::apply(unit.as_mut(), &request, source, initiator).await;
        let tx = match commit_or_rollback(unit, result).await {
            Ok(tx) => tx,
            Err(e) => {
                if e.kind() == ErrorKind::Internal {
                    tracing::error!(source = %source, error = %e, "Transfer failed");
                } else {
                    warn!(source = %source, error = %e, "Transfer rejected");
                }
                return Err(e);
            }
        };

        info!(
            transaction_id = %tx.id,
            source = %tx.source,
            destination = tx.destination_branch_id,
            amount = %tx.amount,
            currency = %tx.currency,
            tax_amount = %tx.tax_amount,
            status = %tx.status,
            "Transfer created"
        );

        CacheKeys::new()
            .source(tx.source)
            .branch(tx.destination_branch_id)
            .transaction(tx.id)
            .send(self.cache.as_ref());

        Ok(tx.id)
    }

    /// Input checks done before any unit is opened
    pub fn validate(request: &TransferRequest) -> Result<(), LedgerError> {
        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount);
        }
        if request.base_amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount("base_amount"));
        }
        if request.benefited_amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount("benefited_amount"));
        }
        if let Some(rate) = request.tax_rate {
            TaxRate::new(rate)?;
        }
        if request.tax_amount.is_some_and(|t| t < Decimal::ZERO) {
            return Err(LedgerError::NegativeAmount("tax_amount"));
        }
        if request.destination_branch_id == SYSTEM_MANAGER_ID {
            return Err(LedgerError::SystemManagerCannotReceive);
        }
        Ok(())
    }

    async fn apply(
        unit: &mut dyn LedgerUnit,
        request: &TransferRequest,
        source: FundSource,
        initiator: &Actor,
    ) -> Result<Transaction, LedgerError> {
        let destination_id = request.destination_branch_id;
        let account = request.currency.account();

        let (sender, destination) = Self::lock_branches(unit, source, destination_id).await?;

        let tax_rate = match source {
            FundSource::Branch(id) => {
                let sender = sender.ok_or(LedgerError::BranchNotFound(id))?;
                let available = sender.balance(account);
                if available < request.amount {
                    return Err(LedgerError::InsufficientFunds {
                        branch: id,
                        account,
                        available,
                        requested: request.amount,
                    });
                }
                TaxRate::new(sender.tax_rate)?
            }
            FundSource::SystemManager => TaxRate::ZERO,
        };

        if destination.is_none() {
            return Err(LedgerError::BranchNotFound(destination_id));
        }

        let id = TransactionId::new();

        if let FundSource::Branch(sender_id) = source {
            unit.adjust_balance(sender_id, account, -request.amount)
                .await?;
            unit.append_fund_record(&NewFundRecord {
                branch_id: sender_id,
                amount: -request.amount,
                kind: FundKind::Deduction,
                currency: request.currency,
                description: format!("Transaction {} deduction", id),
            })
            .await?;
        }

        unit.adjust_balance(destination_id, account, request.amount)
            .await?;
        unit.append_fund_record(&NewFundRecord {
            branch_id: destination_id,
            amount: request.amount,
            kind: FundKind::Allocation,
            currency: request.currency,
            description: format!("Transaction {} allocation from {}", id, source),
        })
        .await?;

        let tx = Transaction {
            id,
            source,
            destination_branch_id: destination_id,
            sender: request.sender.clone(),
            receiver: request.receiver.clone(),
            amount: request.amount,
            base_amount: request.base_amount,
            benefited_amount: request.benefited_amount,
            currency: request.currency,
            tax_rate: tax_rate.percent(),
            tax_amount: tax_rate.tax_on(request.benefited_amount),
            message: request.message.clone(),
            employee_id: Some(initiator.user_id),
            employee_name: request.employee_name.clone(),
            branch_governorate: request.branch_governorate.clone(),
            status: TransactionStatus::Processing,
            is_received: false,
            receipt: None,
            date: request.date.unwrap_or_else(Utc::now),
        };
        unit.insert_transaction(&tx).await?;

        unit.insert_notification(&NewNotification {
            transaction_id: id,
            recipient_phone: tx.receiver.mobile.clone(),
            message: notification_message(&tx),
        })
        .await?;

        Ok(tx)
    }

    /// Lock sender and destination rows in ascending id order so that
    /// opposite-direction transfers cannot deadlock.
    async fn lock_branches(
        unit: &mut dyn LedgerUnit,
        source: FundSource,
        destination: BranchId,
    ) -> Result<(Option<Branch>, Option<Branch>), LedgerError> {
        let mut ids: Vec<BranchId> = source.branch_id().into_iter().collect();
        ids.push(destination);
        ids.sort_unstable();
        ids.dedup();

        let mut locked = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(branch) = unit.branch(id, LockMode::ForUpdate).await? {
                locked.push(branch);
            }
        }

        let find = |id: BranchId| locked.iter().find(|b| b.id == id).cloned();
        Ok((source.branch_id().and_then(find), find(destination)))
    }
}

pub(crate) fn notification_message(tx: &Transaction) -> String {
    format!(
        "Hello {}, you have a new money transfer of {} {} waiting. \
         Please visit your nearest branch to collect it.",
        tx.receiver.name, tx.amount, tx.currency
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn request(amount: &str) -> TransferRequest {
        TransferRequest::new(2, d(amount), Currency::Syp)
    }

    #[test]
    fn test_validate_amount() {
        assert_eq!(
            TransferOrchestrator::validate(&request("0")),
            Err(LedgerError::InvalidAmount)
        );
        assert_eq!(
            TransferOrchestrator::validate(&request("-5")),
            Err(LedgerError::InvalidAmount)
        );
        assert!(TransferOrchestrator::validate(&request("0.01")).is_ok());
    }

    #[test]
    fn test_validate_negative_parts() {
        let mut req = request("10");
        req.base_amount = d("-1");
        assert_eq!(
            TransferOrchestrator::validate(&req),
            Err(LedgerError::NegativeAmount("base_amount"))
        );

        let req = request("10").with_benefited(d("-1"));
        assert_eq!(
            TransferOrchestrator::validate(&req),
            Err(LedgerError::NegativeAmount("benefited_amount"))
        );
    }

    #[test]
    fn test_validate_advisory_tax() {
        let mut req = request("10");
        req.tax_rate = Some(d("101"));
        assert_eq!(
            TransferOrchestrator::validate(&req),
            Err(LedgerError::InvalidTaxRate(d("101")))
        );

        req.tax_rate = Some(d("99"));
        req.tax_amount = Some(d("-3"));
        assert_eq!(
            TransferOrchestrator::validate(&req),
            Err(LedgerError::NegativeAmount("tax_amount"))
        );
    }

    #[test]
    fn test_system_manager_cannot_receive() {
        let req = TransferRequest::new(SYSTEM_MANAGER_ID, d("10"), Currency::Usd);
        assert_eq!(
            TransferOrchestrator::validate(&req),
            Err(LedgerError::SystemManagerCannotReceive)
        );
    }
}
