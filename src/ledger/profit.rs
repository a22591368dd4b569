//! Profit Recorder
//!
//! Profit comes from the benefited amount only; the transferred face value
//! is a pass-through. On completion the benefited amount `B` at rate `R` is
//! split into
//!
//! - `tax = B × R / 100` (source `tax`)
//! - `profit = B − tax` (source `benefited_amount`)
//!
//! so the two records always sum to exactly `B`. Both are credited to the
//! sending side and dated at the transaction date.

use rust_decimal::Decimal;

use crate::money::TaxRate;

use super::error::LedgerError;
use super::store::LedgerUnit;
use super::types::{FundSource, LockMode, NewProfitRecord, ProfitRecord, ProfitSource, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfitSplit {
    pub profit: Decimal,
    pub tax: Decimal,
}

pub struct ProfitRecorder;

impl ProfitRecorder {
    pub fn split(benefited: Decimal, rate: TaxRate) -> ProfitSplit {
        let tax = rate.tax_on(benefited);
        ProfitSplit {
            profit: benefited - tax,
            tax,
        }
    }

    /// Write the profit records for a transaction entering `completed`.
    ///
    /// Zero parts are skipped; a non-positive benefited amount writes nothing.
    pub async fn record(
        unit: &mut dyn LedgerUnit,
        tx: &Transaction,
    ) -> Result<Vec<ProfitRecord>, LedgerError> {
        if tx.benefited_amount <= Decimal::ZERO {
            tracing::info!(
                transaction_id = %tx.id,
                benefited_amount = %tx.benefited_amount,
                "No benefited amount, skipping profit"
            );
            return Ok(Vec::new());
        }

        // Keep the beneficiary row from disappearing under us
        if let FundSource::Branch(id) = tx.source
            && unit.branch(id, LockMode::Shared).await?.is_none()
        {
            return Err(LedgerError::BranchNotFound(id));
        }

        let split = Self::split(tx.benefited_amount, TaxRate::new(tx.tax_rate)?);

        let mut records = Vec::with_capacity(2);
        for (amount, source_type) in [
            (split.profit, ProfitSource::BenefitedAmount),
            (split.tax, ProfitSource::Tax),
        ] {
            if amount <= Decimal::ZERO {
                continue;
            }
            let record = unit
                .insert_profit(&NewProfitRecord {
                    beneficiary: tx.source,
                    transaction_id: tx.id,
                    profit_amount: amount,
                    currency: tx.currency,
                    source_type,
                    date: tx.date,
                })
                .await?;
            records.push(record);
        }

        tracing::info!(
            transaction_id = %tx.id,
            beneficiary = %tx.source,
            profit = %split.profit,
            tax = %split.tax,
            currency = %tx.currency,
            "Profit recorded"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_split_sums_to_benefited() {
        let split = ProfitRecorder::split(d("50"), TaxRate::new(d("10")).unwrap());
        assert_eq!(split.profit, d("45"));
        assert_eq!(split.tax, d("5"));
        assert_eq!(split.profit + split.tax, d("50"));
    }

    #[test]
    fn test_split_awkward_rate() {
        let benefited = d("33.33");
        let split = ProfitRecorder::split(benefited, TaxRate::new(d("7.5")).unwrap());
        assert_eq!(split.profit + split.tax, benefited);
    }

    #[test]
    fn test_split_edges() {
        let zero = ProfitRecorder::split(d("80"), TaxRate::ZERO);
        assert_eq!(zero.tax, Decimal::ZERO);
        assert_eq!(zero.profit, d("80"));

        let full = ProfitRecorder::split(d("80"), TaxRate::new(d("100")).unwrap());
        assert_eq!(full.profit, Decimal::ZERO);
        assert_eq!(full.tax, d("80"));
    }
}
