//! Black-box scenarios against the public ledger API on the in-memory store.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::sync::Arc;

use fund_ledger::config::LedgerConfig;
use fund_ledger::ledger::{
    Actor, AllocationOp, Branch, FundKind, LedgerError, MemoryLedgerStore, NewBranch,
    ProfitSource, RecordingInvalidator, SYSTEM_MANAGER_ID, TransactionStatus, TransferRequest,
};
use fund_ledger::money::{BalanceAccount, Currency};
use fund_ledger::FundLedger;

fn d(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn ledger() -> (FundLedger, Arc<MemoryLedgerStore>) {
    let store = Arc::new(MemoryLedgerStore::new());
    let ledger = FundLedger::new(
        store.clone(),
        Arc::new(RecordingInvalidator::new()),
        &LedgerConfig::default(),
    );
    (ledger, store)
}

async fn seed(store: &MemoryLedgerStore, code: &str, syp: &str, usd: &str, tax: &str) -> Branch {
    store
        .seed_branch(
            NewBranch::new(code, code)
                .with_balances(d(syp), d(usd))
                .with_tax_rate(d(tax)),
        )
        .await
}

#[tokio::test]
async fn scenario_transfer_complete_cancel_restores_sender() {
    let (ledger, store) = ledger();
    let director = Actor::director(1);
    let a = seed(&store, "A", "1000", "0", "10").await;
    let b = seed(&store, "B", "1000", "0", "0").await;

    let req = TransferRequest::new(b.id, d("200"), Currency::Syp).with_benefited(d("50"));
    let id = ledger.initiate_transfer(req, a.id, &director).await.unwrap();

    let tx = ledger.reader().transaction(id).await.unwrap();
    assert_eq!(tx.tax_amount, d("5.0"));
    assert_eq!(tx.status, TransactionStatus::Processing);
    assert_eq!(ledger.reader().branch(a.id).await.unwrap().balance_syp, d("800"));
    assert_eq!(ledger.reader().branch(b.id).await.unwrap().balance_syp, d("1200"));

    let completed = ledger
        .update_status(id, TransactionStatus::Completed, &director)
        .await
        .unwrap();
    let total: Decimal = completed.profits.iter().map(|p| p.profit_amount).sum();
    assert_eq!(total, d("50"));
    assert!(
        completed
            .profits
            .iter()
            .any(|p| p.source_type == ProfitSource::BenefitedAmount && p.profit_amount == d("45"))
    );

    ledger
        .update_status(id, TransactionStatus::Cancelled, &director)
        .await
        .unwrap();
    assert_eq!(ledger.reader().branch(a.id).await.unwrap().balance_syp, d("1000"));
    assert!(ledger.reader().profits_for_branch(a.id).await.unwrap().is_empty());

    let history = ledger.reader().fund_history(a.id).await.unwrap();
    assert!(
        history
            .iter()
            .any(|r| r.kind == FundKind::Refund && r.amount == d("200"))
    );
}

#[tokio::test]
async fn scenario_usd_deduction_beyond_balance() {
    let (ledger, store) = ledger();
    let a = seed(&store, "A", "0", "300", "0").await;

    let err = ledger
        .adjust_allocation(a.id, d("500"), AllocationOp::Deduction, "USD", None, &Actor::director(1))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            account: BalanceAccount::Usd,
            ..
        }
    ));
    assert_eq!(ledger.reader().branch(a.id).await.unwrap().balance_usd, d("300"));
}

#[tokio::test]
async fn scenario_system_manager_never_debits() {
    let (ledger, store) = ledger();
    let b = seed(&store, "B", "0", "0", "0").await;
    let c = seed(&store, "C", "70", "0", "0").await;

    let req = TransferRequest::new(b.id, d("5000"), Currency::Usd);
    ledger
        .initiate_transfer(req, SYSTEM_MANAGER_ID, &Actor::director(1))
        .await
        .unwrap();

    assert_eq!(ledger.reader().branch(b.id).await.unwrap().balance_usd, d("5000"));
    assert_eq!(ledger.reader().branch(c.id).await.unwrap().balance_syp, d("70"));
}

#[tokio::test]
async fn scenario_tax_amount_survives_rate_edit() {
    let (ledger, store) = ledger();
    let director = Actor::director(1);
    let a = seed(&store, "A", "1000", "0", "15").await;
    let b = seed(&store, "B", "0", "0", "0").await;

    let req = TransferRequest::new(b.id, d("100"), Currency::Syp).with_benefited(d("40"));
    let id = ledger.initiate_transfer(req, a.id, &director).await.unwrap();

    for rate in ["0", "50", "100"] {
        ledger.set_tax_rate(a.id, d(rate), &director).await.unwrap();
        let tx = ledger.reader().transaction(id).await.unwrap();
        assert_eq!(tx.tax_amount, d("6"));
        assert_eq!(tx.tax_rate, d("15"));
    }
}

/// Random transfers and adjustments over branches that start empty. At every
/// step the per-account balance total must match the net of allocation and
/// deduction records, and no balance may go negative.
#[tokio::test]
async fn conservation_under_random_operations() {
    let (ledger, store) = ledger();
    let director = Actor::director(1);
    let mut rng = StdRng::seed_from_u64(0x5EED);

    let mut ids = Vec::new();
    for code in ["A", "B", "C", "D"] {
        ids.push(seed(&store, code, "0", "0", "10").await.id);
    }

    for _ in 0..300 {
        let branch = ids[rng.gen_range(0..ids.len())];
        let (currency, label) = if rng.gen_bool(0.5) {
            (Currency::Syp, "SYP")
        } else {
            (Currency::Usd, "USD")
        };
        let amount = Decimal::new(rng.gen_range(1..50_000), 2);

        let result = match rng.gen_range(0..4) {
            0 => ledger
                .adjust_allocation(branch, amount, AllocationOp::Allocation, label, None, &director)
                .await
                .map(|_| ()),
            1 => ledger
                .adjust_allocation(branch, amount, AllocationOp::Deduction, label, None, &director)
                .await
                .map(|_| ()),
            _ => {
                let destination = ids[rng.gen_range(0..ids.len())];
                let req = TransferRequest::new(destination, amount, currency)
                    .with_benefited(Decimal::new(rng.gen_range(0..1_000), 2));
                ledger
                    .initiate_transfer(req, branch, &director)
                    .await
                    .map(|_| ())
            }
        };

        if let Err(e) = result {
            assert!(
                matches!(e, LedgerError::InsufficientFunds { .. }),
                "unexpected error: {}",
                e
            );
        }

        let totals = ledger.reader().balance_totals().await.unwrap();
        let net = ledger.reader().net_allocations().await.unwrap();
        assert_eq!(totals, net);
    }

    for branch in ledger.reader().branches().await.unwrap() {
        assert!(branch.balance_syp >= Decimal::ZERO);
        assert!(branch.balance_usd >= Decimal::ZERO);
    }
}
