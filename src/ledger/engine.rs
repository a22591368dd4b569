//! Fund ledger facade
//!
//! Wires the orchestrator, transition engine, allocation desk and reader
//! onto one store and one cache sink.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::config::LedgerConfig;
use crate::db::Database;

use super::allocation::{AdjustmentOutcome, AllocationDesk, AllocationOp};
use super::cache::{CacheInvalidator, LoggingInvalidator};
use super::error::LedgerError;
use super::orchestrator::TransferOrchestrator;
use super::pg::PgLedgerStore;
use super::snapshot::LedgerReader;
use super::state::TransactionStatus;
use super::store::LedgerStore;
use super::transition::{StatusTransitionEngine, TransitionOutcome};
use super::types::{
    Actor, Branch, BranchId, FundHistoryRecord, ReceiptConfirmation, Transaction, TransactionId,
    TransferRequest,
};

pub struct FundLedger {
    store: Arc<dyn LedgerStore>,
    transfers: TransferOrchestrator,
    transitions: StatusTransitionEngine,
    allocations: AllocationDesk,
    reader: LedgerReader,
}

impl FundLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn CacheInvalidator>,
        config: &LedgerConfig,
    ) -> Self {
        if !config.strict_transitions {
            tracing::debug!("Unguarded status transitions are allowed");
        }
        Self {
            transfers: TransferOrchestrator::new(store.clone(), cache.clone()),
            transitions: StatusTransitionEngine::new(
                store.clone(),
                cache.clone(),
                config.strict_transitions,
            ),
            allocations: AllocationDesk::new(store.clone(), cache),
            reader: LedgerReader::new(store.clone()),
            store,
        }
    }

    /// Production wiring: Postgres store, log-only cache sink
    pub fn with_postgres(db: &Database, config: &LedgerConfig) -> Self {
        let store = Arc::new(PgLedgerStore::new(db.pool().clone(), config.lock_timeout()));
        Self::new(store, Arc::new(LoggingInvalidator), config)
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn reader(&self) -> &LedgerReader {
        &self.reader
    }

    pub async fn initiate_transfer(
        &self,
        request: TransferRequest,
        source_branch_id: BranchId,
        initiator: &Actor,
    ) -> Result<TransactionId, LedgerError> {
        self.transfers
            .initiate_transfer(request, source_branch_id, initiator)
            .await
    }

    pub async fn update_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        actor: &Actor,
    ) -> Result<TransitionOutcome, LedgerError> {
        self.transitions.update_status(id, status, actor).await
    }

    pub async fn confirm_receipt(
        &self,
        confirmation: ReceiptConfirmation,
        actor: &Actor,
    ) -> Result<Transaction, LedgerError> {
        self.transitions.confirm_receipt(confirmation, actor).await
    }

    pub async fn adjust_allocation(
        &self,
        branch_id: BranchId,
        amount: Decimal,
        op: AllocationOp,
        currency: &str,
        description: Option<String>,
        actor: &Actor,
    ) -> Result<AdjustmentOutcome, LedgerError> {
        self.allocations
            .adjust_allocation(branch_id, amount, op, currency, description, actor)
            .await
    }

    pub async fn reset_allocations(
        &self,
        branch_id: BranchId,
        currency: Option<&str>,
        actor: &Actor,
    ) -> Result<Vec<FundHistoryRecord>, LedgerError> {
        self.allocations
            .reset_allocations(branch_id, currency, actor)
            .await
    }

    pub async fn set_tax_rate(
        &self,
        branch_id: BranchId,
        rate: Decimal,
        actor: &Actor,
    ) -> Result<Branch, LedgerError> {
        self.allocations.set_tax_rate(branch_id, rate, actor).await
    }
}
