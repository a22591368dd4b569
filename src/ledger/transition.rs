//! Status Transition Engine
//!
//! Drives a transaction through the state machine in [`super::state`] and
//! applies the effect paired with each edge inside one atomic unit:
//!
//! | edge                               | effect                         |
//! |------------------------------------|--------------------------------|
//! | processing → completed             | record profit                  |
//! | processing → cancelled / rejected  | refund sender, delete profit   |
//! | completed → cancelled / rejected   | refund sender, delete profit   |
//! | anything else                      | status overwrite only          |
//!
//! In strict mode the "anything else" edges are refused with
//! `InvalidStateTransition` instead.
//!
//! Locks are taken in a fixed order: the transaction row, then the sending
//! branch row.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::{CacheInvalidator, CacheKeys};
use super::error::LedgerError;
use super::profit::ProfitRecorder;
use super::state::{TransactionStatus, TransitionEffect};
use super::store::{LedgerStore, LedgerUnit, commit_or_rollback};
use super::types::{
    Actor, FundHistoryRecord, FundKind, FundSource, LockMode, NewFundRecord, ProfitRecord,
    Receipt, ReceiptConfirmation, Role, Transaction, TransactionId,
};

/// What a committed status change did
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    /// Transaction as it stands after the change
    pub transaction: Transaction,
    pub previous: TransactionStatus,
    pub effect: TransitionEffect,
    /// Refund record, if the sender was credited
    pub refund: Option<FundHistoryRecord>,
    pub profits: Vec<ProfitRecord>,
    pub profits_reversed: u64,
}

pub struct StatusTransitionEngine {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn CacheInvalidator>,
    strict: bool,
}

impl StatusTransitionEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn CacheInvalidator>,
        strict: bool,
    ) -> Self {
        Self {
            store,
            cache,
            strict,
        }
    }

    pub async fn update_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        actor: &Actor,
    ) -> Result<TransitionOutcome, LedgerError> {
        let mut unit = self.store.begin().await?;
        let result = self.apply(unit.as_mut(), id, status, actor).await;
        let outcome = commit_or_rollback(unit, result).await.inspect_err(|e| {
            warn!(transaction_id = %id, to = %status, error = %e, "Status change rejected");
        })?;

        let tx = &outcome.transaction;
        info!(
            transaction_id = %tx.id,
            source = %tx.source,
            destination = tx.destination_branch_id,
            amount = %tx.amount,
            currency = %tx.currency,
            from = %outcome.previous,
            status = %tx.status,
            effect = ?outcome.effect,
            "Transaction status updated"
        );

        CacheKeys::new()
            .source(tx.source)
            .branch(tx.destination_branch_id)
            .transaction(tx.id)
            .send(self.cache.as_ref());

        Ok(outcome)
    }

    async fn apply(
        &self,
        unit: &mut dyn LedgerUnit,
        id: TransactionId,
        to: TransactionStatus,
        actor: &Actor,
    ) -> Result<TransitionOutcome, LedgerError> {
        let mut tx = unit
            .transaction(id, LockMode::ForUpdate)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))?;

        check_party(actor, &tx)?;

        let from = tx.status;
        let effect = TransitionEffect::plan(from, to);
        if self.strict && effect == TransitionEffect::Unguarded {
            return Err(LedgerError::InvalidStateTransition(format!(
                "{} -> {}",
                from, to
            )));
        }

        let mut outcome_refund = None;
        let mut profits = Vec::new();
        let mut profits_reversed = 0;

        if effect.refunds() {
            outcome_refund = refund_sender(unit, &tx, to).await?;
            // An overwritten "processing" may still carry profit from an
            // earlier completion, so every refund edge clears it.
            profits_reversed = unit.delete_profits(id).await?;
        } else if effect == TransitionEffect::RecordProfit {
            profits = ProfitRecorder::record(unit, &tx).await?;
        } else {
            warn!(
                transaction_id = %id,
                from = %from,
                to = %to,
                "Unguarded status overwrite, no side effects applied"
            );
        }

        unit.update_status(id, to).await?;
        let notified = unit
            .set_notification_status(id, to.notification_status())
            .await?;
        if notified == 0 {
            debug!(transaction_id = %id, "No notification linked to transaction");
        }

        tx.status = to;
        Ok(TransitionOutcome {
            transaction: tx,
            previous: from,
            effect,
            refund: outcome_refund,
            profits,
            profits_reversed,
        })
    }

    /// Record that the receiver collected the money at the destination branch.
    ///
    /// Only the destination branch sees the transaction here; anyone else
    /// gets `TransactionNotFound`. Status is left alone.
    pub async fn confirm_receipt(
        &self,
        confirmation: ReceiptConfirmation,
        actor: &Actor,
    ) -> Result<Transaction, LedgerError> {
        let mut unit = self.store.begin().await?;
        let result = Self::apply_receipt(unit.as_mut(), &confirmation, actor).await;
        let tx = commit_or_rollback(unit, result).await.inspect_err(|e| {
            warn!(
                transaction_id = %confirmation.transaction_id,
                error = %e,
                "Receipt confirmation rejected"
            );
        })?;

        info!(
            transaction_id = %tx.id,
            destination = tx.destination_branch_id,
            received_by = actor.user_id,
            status = %tx.status,
            "Transaction marked as received"
        );

        CacheKeys::new()
            .source(tx.source)
            .branch(tx.destination_branch_id)
            .transaction(tx.id)
            .send(self.cache.as_ref());

        Ok(tx)
    }

    async fn apply_receipt(
        unit: &mut dyn LedgerUnit,
        confirmation: &ReceiptConfirmation,
        actor: &Actor,
    ) -> Result<Transaction, LedgerError> {
        let id = confirmation.transaction_id;
        let not_found = || LedgerError::TransactionNotFound(id.to_string());

        let mut tx = unit
            .transaction(id, LockMode::ForUpdate)
            .await?
            .ok_or_else(not_found)?;
        if actor.branch_id != Some(tx.destination_branch_id) {
            return Err(not_found());
        }

        let receipt = Receipt {
            receiver_id: confirmation.receiver_id.clone(),
            receiver_address: confirmation.receiver_address.clone(),
            received_by: actor.user_id,
            received_at: Utc::now(),
        };
        unit.update_receipt(confirmation, &receipt).await?;

        tx.is_received = true;
        tx.receiver = confirmation.receiver.clone();
        tx.receipt = Some(receipt);
        Ok(tx)
    }
}

/// Branch-scoped callers may only touch transactions their branch sent or
/// receives.
fn check_party(actor: &Actor, tx: &Transaction) -> Result<(), LedgerError> {
    if actor.role == Role::Director {
        return Ok(());
    }
    let party = actor.branch_id.is_some_and(|b| {
        tx.source.branch_id() == Some(b) || tx.destination_branch_id == b
    });
    if party {
        Ok(())
    } else {
        Err(LedgerError::Forbidden(format!(
            "user {} cannot change transaction {}",
            actor.user_id, tx.id
        )))
    }
}

/// Credit `amount` back to the sending branch. The System Manager never
/// paid, and a sending branch that no longer exists cannot be credited.
async fn refund_sender(
    unit: &mut dyn LedgerUnit,
    tx: &Transaction,
    to: TransactionStatus,
) -> Result<Option<FundHistoryRecord>, LedgerError> {
    let FundSource::Branch(sender_id) = tx.source else {
        return Ok(None);
    };

    if unit.branch(sender_id, LockMode::ForUpdate).await?.is_none() {
        warn!(
            transaction_id = %tx.id,
            branch = sender_id,
            "Sending branch missing, refund skipped"
        );
        return Ok(None);
    }

    unit.adjust_balance(sender_id, tx.currency.account(), tx.amount)
        .await?;
    let record = unit
        .append_fund_record(&NewFundRecord {
            branch_id: sender_id,
            amount: tx.amount,
            kind: FundKind::Refund,
            currency: tx.currency,
            description: format!("Refund for {} transaction {}", to, tx.id),
        })
        .await?;

    Ok(Some(record))
}
