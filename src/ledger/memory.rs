//! In-Process Ledger Store
//!
//! A [`LedgerStore`] kept entirely in memory. A unit takes a store-wide
//! writer lock (so it is serializable, not merely row-locked), works on a
//! staged copy of the committed state and publishes it on commit. Dropping
//! a unit discards the copy.
//!
//! Enforces the same constraints as the SQL schema: balances never go below
//! zero, and fund / profit / notification rows must reference existing
//! branches and transactions.
//!
//! Failures can be injected per write with [`MemoryLedgerStore::fail_next`].
//!
//! Meant for tests and small fixtures: `begin` copies the whole committed
//! state, so every unit costs O(history). Production uses
//! [`super::pg::PgLedgerStore`].

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::money::BalanceAccount;

use super::error::LedgerError;
use super::state::{NotificationStatus, TransactionStatus};
use super::store::{LedgerStore, LedgerUnit};
use super::types::{
    Branch, BranchId, FundHistoryRecord, LockMode, NewBranch, NewFundRecord, NewNotification,
    NewProfitRecord, Notification, ProfitRecord, Receipt, ReceiptConfirmation, Transaction,
    TransactionId,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Write operation that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    AdjustBalance,
    AppendFundRecord,
    InsertTransaction,
    UpdateStatus,
    InsertProfit,
    DeleteProfits,
    InsertNotification,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    branches: BTreeMap<BranchId, Branch>,
    transactions: HashMap<TransactionId, Transaction>,
    fund_history: Vec<FundHistoryRecord>,
    profits: Vec<ProfitRecord>,
    notifications: Vec<Notification>,
    next_branch_id: i64,
    next_fund_id: i64,
    next_profit_id: i64,
    next_notification_id: i64,
}

impl MemoryState {
    fn branch_mut(&mut self, id: BranchId) -> Result<&mut Branch, LedgerError> {
        self.branches
            .get_mut(&id)
            .ok_or(LedgerError::BranchNotFound(id))
    }

    fn transaction_mut(&mut self, id: TransactionId) -> Result<&mut Transaction, LedgerError> {
        self.transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::TransactionNotFound(id.to_string()))
    }

    fn require_branch_ref(&self, id: BranchId, table: &str) -> Result<(), LedgerError> {
        if self.branches.contains_key(&id) {
            Ok(())
        } else {
            Err(LedgerError::DuplicateOrReferential(format!(
                "{} references missing branch {}",
                table, id
            )))
        }
    }

    fn require_transaction_ref(&self, id: TransactionId, table: &str) -> Result<(), LedgerError> {
        if self.transactions.contains_key(&id) {
            Ok(())
        } else {
            Err(LedgerError::DuplicateOrReferential(format!(
                "{} references missing transaction {}",
                table, id
            )))
        }
    }
}

type Faults = Arc<Mutex<Vec<(FailPoint, LedgerError)>>>;

async fn trip(faults: &Faults, point: FailPoint) -> Result<(), LedgerError> {
    let mut faults = faults.lock().await;
    match faults.iter().position(|(p, _)| *p == point) {
        Some(idx) => Err(faults.remove(idx).1),
        None => Ok(()),
    }
}

/// In-memory balance store
pub struct MemoryLedgerStore {
    writer: Arc<Mutex<()>>,
    state: Arc<RwLock<MemoryState>>,
    faults: Faults,
    lock_timeout: Duration,
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Bound on how long `begin` waits for the writer lock
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            writer: Arc::new(Mutex::new(())),
            state: Arc::new(RwLock::new(MemoryState {
                next_branch_id: 1,
                next_fund_id: 1,
                next_profit_id: 1,
                next_notification_id: 1,
                ..Default::default()
            })),
            faults: Arc::new(Mutex::new(Vec::new())),
            lock_timeout,
        }
    }

    /// Create a branch directly (branch CRUD lives outside the engine).
    /// Ids start at 1; 0 is reserved for the System Manager.
    pub async fn seed_branch(&self, new: NewBranch) -> Branch {
        let _writer = self.writer.lock().await;
        let mut state = self.state.write().await;

        let id = state.next_branch_id;
        state.next_branch_id += 1;

        let branch = Branch {
            id,
            code: new.code,
            name: new.name,
            location: new.location,
            governorate: new.governorate,
            phone_number: new.phone_number,
            balance_syp: new.balance_syp,
            balance_usd: new.balance_usd,
            tax_rate: new.tax_rate,
            created_at: Utc::now(),
        };
        state.branches.insert(id, branch.clone());
        branch
    }

    /// Make the next call of `point` fail with `error`
    pub async fn fail_next(&self, point: FailPoint, error: LedgerError) {
        self.faults.lock().await.push((point, error));
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerUnit>, LedgerError> {
        let writer = tokio::time::timeout(self.lock_timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| {
                LedgerError::Conflict(format!(
                    "lock wait exceeded {}ms",
                    self.lock_timeout.as_millis()
                ))
            })?;

        let staged = self.state.read().await.clone();

        Ok(Box::new(MemoryUnit {
            _writer: writer,
            staged,
            state: self.state.clone(),
            faults: self.faults.clone(),
        }))
    }

    async fn branch(&self, id: BranchId) -> Result<Option<Branch>, LedgerError> {
        Ok(self.state.read().await.branches.get(&id).cloned())
    }

    async fn branches(&self) -> Result<Vec<Branch>, LedgerError> {
        Ok(self.state.read().await.branches.values().cloned().collect())
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.state.read().await.transactions.get(&id).cloned())
    }

    async fn fund_history(&self, branch: BranchId) -> Result<Vec<FundHistoryRecord>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .fund_history
            .iter()
            .rev()
            .filter(|r| r.branch_id == branch)
            .cloned()
            .collect())
    }

    async fn all_fund_history(&self) -> Result<Vec<FundHistoryRecord>, LedgerError> {
        Ok(self.state.read().await.fund_history.clone())
    }

    async fn profits_for_branch(&self, branch: BranchId) -> Result<Vec<ProfitRecord>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .profits
            .iter()
            .filter(|p| p.beneficiary.branch_id() == Some(branch))
            .cloned()
            .collect())
    }

    async fn profits_for_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Vec<ProfitRecord>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .profits
            .iter()
            .filter(|p| p.transaction_id == id)
            .cloned()
            .collect())
    }

    async fn notification(&self, id: TransactionId) -> Result<Option<Notification>, LedgerError> {
        let state = self.state.read().await;
        Ok(state
            .notifications
            .iter()
            .find(|n| n.transaction_id == id)
            .cloned())
    }
}

struct MemoryUnit {
    _writer: OwnedMutexGuard<()>,
    staged: MemoryState,
    state: Arc<RwLock<MemoryState>>,
    faults: Faults,
}

#[async_trait]
impl LedgerUnit for MemoryUnit {
    async fn branch(
        &mut self,
        id: BranchId,
        _lock: LockMode,
    ) -> Result<Option<Branch>, LedgerError> {
        // The writer lock already excludes every other unit
        Ok(self.staged.branches.get(&id).cloned())
    }

    async fn adjust_balance(
        &mut self,
        id: BranchId,
        account: BalanceAccount,
        delta: Decimal,
    ) -> Result<Decimal, LedgerError> {
        trip(&self.faults, FailPoint::AdjustBalance).await?;

        let branch = self.staged.branch_mut(id)?;
        let balance = branch.balance_mut(account);
        let updated = *balance + delta;
        if updated < Decimal::ZERO {
            return Err(LedgerError::DuplicateOrReferential(format!(
                "check constraint {}_non_negative violated for branch {}",
                account.column(),
                id
            )));
        }
        *balance = updated;
        Ok(updated)
    }

    async fn set_tax_rate(&mut self, id: BranchId, tax_rate: Decimal) -> Result<(), LedgerError> {
        self.staged.branch_mut(id)?.tax_rate = tax_rate;
        Ok(())
    }

    async fn transaction(
        &mut self,
        id: TransactionId,
        _lock: LockMode,
    ) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.staged.transactions.get(&id).cloned())
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), LedgerError> {
        trip(&self.faults, FailPoint::InsertTransaction).await?;

        if self.staged.transactions.contains_key(&tx.id) {
            return Err(LedgerError::DuplicateOrReferential(format!(
                "duplicate transaction id {}",
                tx.id
            )));
        }
        self.staged
            .require_branch_ref(tx.destination_branch_id, "transactions")?;
        if let Some(source) = tx.source.branch_id() {
            self.staged.require_branch_ref(source, "transactions")?;
        }
        self.staged.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn update_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<(), LedgerError> {
        trip(&self.faults, FailPoint::UpdateStatus).await?;
        self.staged.transaction_mut(id)?.status = status;
        Ok(())
    }

    async fn update_receipt(
        &mut self,
        confirmation: &ReceiptConfirmation,
        receipt: &Receipt,
    ) -> Result<(), LedgerError> {
        let tx = self.staged.transaction_mut(confirmation.transaction_id)?;
        tx.is_received = true;
        tx.receiver = confirmation.receiver.clone();
        tx.receipt = Some(receipt.clone());
        Ok(())
    }

    async fn append_fund_record(
        &mut self,
        record: &NewFundRecord,
    ) -> Result<FundHistoryRecord, LedgerError> {
        trip(&self.faults, FailPoint::AppendFundRecord).await?;
        self.staged
            .require_branch_ref(record.branch_id, "fund_history")?;

        let id = self.staged.next_fund_id;
        self.staged.next_fund_id += 1;

        let stored = FundHistoryRecord {
            id,
            branch_id: record.branch_id,
            amount: record.amount,
            kind: record.kind,
            currency: record.currency,
            description: record.description.clone(),
            created_at: Utc::now(),
        };
        self.staged.fund_history.push(stored.clone());
        Ok(stored)
    }

    async fn insert_profit(
        &mut self,
        record: &NewProfitRecord,
    ) -> Result<ProfitRecord, LedgerError> {
        trip(&self.faults, FailPoint::InsertProfit).await?;
        self.staged
            .require_transaction_ref(record.transaction_id, "branch_profits")?;
        if let Some(branch) = record.beneficiary.branch_id() {
            self.staged.require_branch_ref(branch, "branch_profits")?;
        }

        let id = self.staged.next_profit_id;
        self.staged.next_profit_id += 1;

        let stored = ProfitRecord {
            id,
            beneficiary: record.beneficiary,
            transaction_id: record.transaction_id,
            profit_amount: record.profit_amount,
            currency: record.currency,
            source_type: record.source_type,
            date: record.date,
        };
        self.staged.profits.push(stored.clone());
        Ok(stored)
    }

    async fn delete_profits(&mut self, id: TransactionId) -> Result<u64, LedgerError> {
        trip(&self.faults, FailPoint::DeleteProfits).await?;
        let before = self.staged.profits.len();
        self.staged.profits.retain(|p| p.transaction_id != id);
        Ok((before - self.staged.profits.len()) as u64)
    }

    async fn insert_notification(
        &mut self,
        notification: &NewNotification,
    ) -> Result<(), LedgerError> {
        trip(&self.faults, FailPoint::InsertNotification).await?;
        self.staged
            .require_transaction_ref(notification.transaction_id, "notifications")?;

        let id = self.staged.next_notification_id;
        self.staged.next_notification_id += 1;

        self.staged.notifications.push(Notification {
            id,
            transaction_id: notification.transaction_id,
            recipient_phone: notification.recipient_phone.clone(),
            message: notification.message.clone(),
            status: NotificationStatus::Pending,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn set_notification_status(
        &mut self,
        id: TransactionId,
        status: NotificationStatus,
    ) -> Result<u64, LedgerError> {
        let mut updated = 0;
        for n in self
            .staged
            .notifications
            .iter_mut()
            .filter(|n| n.transaction_id == id)
        {
            n.status = status;
            updated += 1;
        }
        Ok(updated)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        trip(&self.faults, FailPoint::Commit).await?;
        let MemoryUnit {
            _writer, staged, state, ..
        } = *self;
        *state.write().await = staged;
        // writer lock released here, after publication
        drop(_writer);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Currency;
    use crate::ledger::types::FundKind;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_seed_ids_skip_system_manager() {
        let store = MemoryLedgerStore::new();
        let a = store.seed_branch(NewBranch::new("A", "Alpha")).await;
        let b = store.seed_branch(NewBranch::new("B", "Beta")).await;
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[tokio::test]
    async fn test_uncommitted_unit_leaves_no_trace() {
        let store = MemoryLedgerStore::new();
        let a = store
            .seed_branch(NewBranch::new("A", "Alpha").with_balances(d("100"), d("0")))
            .await;

        {
            let mut unit = store.begin().await.unwrap();
            unit.adjust_balance(a.id, BalanceAccount::Syp, d("-40"))
                .await
                .unwrap();
            // dropped without commit
        }

        let reloaded = store.branch(a.id).await.unwrap().unwrap();
        assert_eq!(reloaded.balance_syp, d("100"));
    }

    #[tokio::test]
    async fn test_commit_publishes_staged_writes() {
        let store = MemoryLedgerStore::new();
        let a = store.seed_branch(NewBranch::new("A", "Alpha")).await;

        let mut unit = store.begin().await.unwrap();
        unit.adjust_balance(a.id, BalanceAccount::Usd, d("25"))
            .await
            .unwrap();
        unit.append_fund_record(&NewFundRecord {
            branch_id: a.id,
            amount: d("25"),
            kind: FundKind::Allocation,
            currency: Currency::Usd,
            description: "seed".into(),
        })
        .await
        .unwrap();
        unit.commit().await.unwrap();

        assert_eq!(store.branch(a.id).await.unwrap().unwrap().balance_usd, d("25"));
        assert_eq!(store.fund_history(a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_balance_floor_enforced() {
        let store = MemoryLedgerStore::new();
        let a = store
            .seed_branch(NewBranch::new("A", "Alpha").with_balances(d("10"), d("0")))
            .await;

        let mut unit = store.begin().await.unwrap();
        let err = unit
            .adjust_balance(a.id, BalanceAccount::Syp, d("-10.01"))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateOrReferential(_)));
    }

    #[tokio::test]
    async fn test_fund_record_requires_branch() {
        let store = MemoryLedgerStore::new();
        let mut unit = store.begin().await.unwrap();
        let err = unit
            .append_fund_record(&NewFundRecord {
                branch_id: 42,
                amount: d("1"),
                kind: FundKind::Allocation,
                currency: Currency::Syp,
                description: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateOrReferential(_)));
    }

    #[tokio::test]
    async fn test_second_unit_times_out() {
        let store = MemoryLedgerStore::with_lock_timeout(Duration::from_millis(20));
        let _held = store.begin().await.unwrap();

        let err = store.begin().await.err().unwrap();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_reads_do_not_wait_for_units() {
        let store = MemoryLedgerStore::with_lock_timeout(Duration::from_millis(20));
        let a = store.seed_branch(NewBranch::new("A", "Alpha")).await;
        let _held = store.begin().await.unwrap();

        assert!(store.branch(a.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fail_next_trips_once() {
        let store = MemoryLedgerStore::new();
        let a = store.seed_branch(NewBranch::new("A", "Alpha")).await;
        store
            .fail_next(FailPoint::AdjustBalance, LedgerError::Internal("boom".into()))
            .await;

        let mut unit = store.begin().await.unwrap();
        assert!(
            unit.adjust_balance(a.id, BalanceAccount::Syp, d("1"))
                .await
                .is_err()
        );
        assert!(
            unit.adjust_balance(a.id, BalanceAccount::Syp, d("1"))
                .await
                .is_ok()
        );
    }
}
