//! Read-only snapshot accessors for reporting. Lock-free; results may lag
//! a concurrent unit that has not committed yet.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::money::BalanceAccount;

use super::error::LedgerError;
use super::store::LedgerStore;
use super::types::{
    Branch, BranchId, FundHistoryRecord, FundKind, Notification, ProfitRecord, Transaction,
    TransactionId,
};

#[derive(Clone)]
pub struct LedgerReader {
    store: Arc<dyn LedgerStore>,
}

impl LedgerReader {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub async fn transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.store
            .transaction(id)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    pub async fn branch(&self, id: BranchId) -> Result<Branch, LedgerError> {
        self.store
            .branch(id)
            .await?
            .ok_or(LedgerError::BranchNotFound(id))
    }

    pub async fn branches(&self) -> Result<Vec<Branch>, LedgerError> {
        self.store.branches().await
    }

    /// Newest first
    pub async fn fund_history(&self, branch: BranchId) -> Result<Vec<FundHistoryRecord>, LedgerError> {
        self.store.fund_history(branch).await
    }

    pub async fn profits_for_branch(&self, branch: BranchId) -> Result<Vec<ProfitRecord>, LedgerError> {
        self.store.profits_for_branch(branch).await
    }

    pub async fn profits_for_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Vec<ProfitRecord>, LedgerError> {
        self.store.profits_for_transaction(id).await
    }

    pub async fn notification(&self, id: TransactionId) -> Result<Option<Notification>, LedgerError> {
        self.store.notification(id).await
    }

    /// Sum of every branch balance, per account
    pub async fn balance_totals(&self) -> Result<BTreeMap<BalanceAccount, Decimal>, LedgerError> {
        let mut totals = zeroed();
        for branch in self.store.branches().await? {
            for account in BalanceAccount::ALL {
                *totals.entry(account).or_default() += branch.balance(account);
            }
        }
        Ok(totals)
    }

    /// Sum of allocation and deduction records, per account. Refunds are
    /// excluded. After any sequence of transfers and adjustments on branches
    /// seeded at zero this equals [`Self::balance_totals`].
    pub async fn net_allocations(&self) -> Result<BTreeMap<BalanceAccount, Decimal>, LedgerError> {
        let mut totals = zeroed();
        for record in self.store.all_fund_history().await? {
            if matches!(record.kind, FundKind::Allocation | FundKind::Deduction) {
                *totals.entry(record.currency.account()).or_default() += record.amount;
            }
        }
        Ok(totals)
    }
}

fn zeroed() -> BTreeMap<BalanceAccount, Decimal> {
    BalanceAccount::ALL
        .into_iter()
        .map(|a| (a, Decimal::ZERO))
        .collect()
}
