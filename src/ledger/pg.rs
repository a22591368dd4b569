//! PostgreSQL Ledger Store
//!
//! Every unit is one database transaction with `SET LOCAL lock_timeout`, so
//! a blocked `FOR UPDATE` surfaces as SQLSTATE 55P03 and maps to
//! `LedgerError::Conflict`. Balance floors are backed by CHECK constraints
//! in the schema.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row};
use std::time::Duration;

use crate::money::{BalanceAccount, Currency};

use super::error::LedgerError;
use super::state::{NotificationStatus, TransactionStatus};
use super::store::{LedgerStore, LedgerUnit};
use super::types::{
    Branch, BranchId, Contact, FundHistoryRecord, FundSource, LockMode, NewBranch,
    NewFundRecord, NewNotification, NewProfitRecord, Notification, ProfitRecord, Receipt,
    ReceiptConfirmation, Transaction, TransactionId,
};

const BRANCH_COLUMNS: &str = "id, code, name, location, governorate, phone_number, \
     balance_syp, balance_usd, tax_rate, created_at";

const TRANSACTION_COLUMNS: &str = "id, branch_id, destination_branch_id, \
     sender_name, sender_mobile, sender_governorate, sender_location, \
     receiver_name, receiver_mobile, receiver_governorate, receiver_location, \
     amount, base_amount, benefited_amount, currency, tax_rate, tax_amount, \
     message, employee_id, employee_name, branch_governorate, status, \
     is_received, receiver_id, receiver_address, received_by, received_at, date";

const FUND_COLUMNS: &str = "id, branch_id, amount, type, currency, description, created_at";

const PROFIT_COLUMNS: &str =
    "id, branch_id, transaction_id, profit_amount, currency, source_type, date";

fn lock_clause(lock: LockMode) -> &'static str {
    match lock {
        LockMode::Shared => " FOR SHARE",
        LockMode::ForUpdate => " FOR UPDATE",
    }
}

/// Production balance store
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a branch row (branch CRUD lives outside the engine)
    pub async fn create_branch(&self, new: &NewBranch) -> Result<Branch, LedgerError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO branches
                (code, name, location, governorate, phone_number, balance_syp, balance_usd, tax_rate)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            BRANCH_COLUMNS
        ))
        .bind(&new.code)
        .bind(&new.name)
        .bind(&new.location)
        .bind(&new.governorate)
        .bind(&new.phone_number)
        .bind(new.balance_syp)
        .bind(new.balance_usd)
        .bind(new.tax_rate)
        .fetch_one(&self.pool)
        .await?;

        row_to_branch(&row)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn begin(&self) -> Result<Box<dyn LedgerUnit>, LedgerError> {
        let mut tx = self.pool.begin().await?;

        // SET does not accept bind parameters
        let set_timeout = format!(
            "SET LOCAL lock_timeout = {}",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&set_timeout).execute(&mut *tx).await?;

        Ok(Box::new(PgLedgerUnit { tx }))
    }

    async fn branch(&self, id: BranchId) -> Result<Option<Branch>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM branches WHERE id = $1",
            BRANCH_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_branch).transpose()
    }

    async fn branches(&self) -> Result<Vec<Branch>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM branches ORDER BY id",
            BRANCH_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_branch).collect()
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn fund_history(&self, branch: BranchId) -> Result<Vec<FundHistoryRecord>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fund_history WHERE branch_id = $1 ORDER BY id DESC",
            FUND_COLUMNS
        ))
        .bind(branch)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_fund_record).collect()
    }

    async fn all_fund_history(&self) -> Result<Vec<FundHistoryRecord>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM fund_history ORDER BY id",
            FUND_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_fund_record).collect()
    }

    async fn profits_for_branch(&self, branch: BranchId) -> Result<Vec<ProfitRecord>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM branch_profits WHERE branch_id = $1 ORDER BY id",
            PROFIT_COLUMNS
        ))
        .bind(branch)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_profit).collect()
    }

    async fn profits_for_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Vec<ProfitRecord>, LedgerError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM branch_profits WHERE transaction_id = $1 ORDER BY id",
            PROFIT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_profit).collect()
    }

    async fn notification(&self, id: TransactionId) -> Result<Option<Notification>, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT id, transaction_id, recipient_phone, message, status, created_at
            FROM notifications
            WHERE transaction_id = $1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_notification).transpose()
    }
}

/// One database transaction
pub struct PgLedgerUnit {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerUnit for PgLedgerUnit {
    async fn branch(
        &mut self,
        id: BranchId,
        lock: LockMode,
    ) -> Result<Option<Branch>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM branches WHERE id = $1{}",
            BRANCH_COLUMNS,
            lock_clause(lock)
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_branch).transpose()
    }

    async fn adjust_balance(
        &mut self,
        id: BranchId,
        account: BalanceAccount,
        delta: Decimal,
    ) -> Result<Decimal, LedgerError> {
        let column = account.column();
        let balance: Option<Decimal> = sqlx::query_scalar(&format!(
            "UPDATE branches SET {col} = {col} + $1 WHERE id = $2 RETURNING {col}",
            col = column
        ))
        .bind(delta)
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        balance.ok_or(LedgerError::BranchNotFound(id))
    }

    async fn set_tax_rate(&mut self, id: BranchId, tax_rate: Decimal) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE branches SET tax_rate = $1 WHERE id = $2")
            .bind(tax_rate)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::BranchNotFound(id));
        }
        Ok(())
    }

    async fn transaction(
        &mut self,
        id: TransactionId,
        lock: LockMode,
    ) -> Result<Option<Transaction>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE id = $1{}",
            TRANSACTION_COLUMNS,
            lock_clause(lock)
        ))
        .bind(id.to_string())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn insert_transaction(&mut self, tx: &Transaction) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, branch_id, destination_branch_id,
                 sender_name, sender_mobile, sender_governorate, sender_location,
                 receiver_name, receiver_mobile, receiver_governorate, receiver_location,
                 amount, base_amount, benefited_amount, currency, tax_rate, tax_amount,
                 message, employee_id, employee_name, branch_governorate, status,
                 is_received, date)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                 $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            "#,
        )
        .bind(tx.id.to_string())
        .bind(tx.source.branch_id())
        .bind(tx.destination_branch_id)
        .bind(&tx.sender.name)
        .bind(&tx.sender.mobile)
        .bind(&tx.sender.governorate)
        .bind(&tx.sender.location)
        .bind(&tx.receiver.name)
        .bind(&tx.receiver.mobile)
        .bind(&tx.receiver.governorate)
        .bind(&tx.receiver.location)
        .bind(tx.amount)
        .bind(tx.base_amount)
        .bind(tx.benefited_amount)
        .bind(tx.currency.as_str())
        .bind(tx.tax_rate)
        .bind(tx.tax_amount)
        .bind(&tx.message)
        .bind(tx.employee_id)
        .bind(&tx.employee_name)
        .bind(&tx.branch_governorate)
        .bind(tx.status.as_str())
        .bind(tx.is_received)
        .bind(tx.date)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_status(
        &mut self,
        id: TransactionId,
        status: TransactionStatus,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE transactions SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::TransactionNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn update_receipt(
        &mut self,
        confirmation: &ReceiptConfirmation,
        receipt: &Receipt,
    ) -> Result<(), LedgerError> {
        let receiver = &confirmation.receiver;
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET is_received = TRUE,
                receiver_name = $1,
                receiver_mobile = $2,
                receiver_governorate = $3,
                receiver_location = $4,
                receiver_id = $5,
                receiver_address = $6,
                received_by = $7,
                received_at = $8
            WHERE id = $9
            "#,
        )
        .bind(&receiver.name)
        .bind(&receiver.mobile)
        .bind(&receiver.governorate)
        .bind(&receiver.location)
        .bind(&receipt.receiver_id)
        .bind(&receipt.receiver_address)
        .bind(receipt.received_by)
        .bind(receipt.received_at)
        .bind(confirmation.transaction_id.to_string())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::TransactionNotFound(
                confirmation.transaction_id.to_string(),
            ));
        }
        Ok(())
    }

    async fn append_fund_record(
        &mut self,
        record: &NewFundRecord,
    ) -> Result<FundHistoryRecord, LedgerError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO fund_history (branch_id, amount, type, currency, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            FUND_COLUMNS
        ))
        .bind(record.branch_id)
        .bind(record.amount)
        .bind(record.kind.as_str())
        .bind(record.currency.as_str())
        .bind(&record.description)
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_fund_record(&row)
    }

    async fn insert_profit(
        &mut self,
        record: &NewProfitRecord,
    ) -> Result<ProfitRecord, LedgerError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO branch_profits
                (branch_id, transaction_id, profit_amount, currency, source_type, date)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            PROFIT_COLUMNS
        ))
        .bind(record.beneficiary.branch_id())
        .bind(record.transaction_id.to_string())
        .bind(record.profit_amount)
        .bind(record.currency.as_str())
        .bind(record.source_type.as_str())
        .bind(record.date)
        .fetch_one(&mut *self.tx)
        .await?;

        row_to_profit(&row)
    }

    async fn delete_profits(&mut self, id: TransactionId) -> Result<u64, LedgerError> {
        let result = sqlx::query("DELETE FROM branch_profits WHERE transaction_id = $1")
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_notification(
        &mut self,
        notification: &NewNotification,
    ) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (transaction_id, recipient_phone, message, status)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(notification.transaction_id.to_string())
        .bind(&notification.recipient_phone)
        .bind(&notification.message)
        .bind(NotificationStatus::Pending.as_str())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn set_notification_status(
        &mut self,
        id: TransactionId,
        status: NotificationStatus,
    ) -> Result<u64, LedgerError> {
        let result = sqlx::query("UPDATE notifications SET status = $1 WHERE transaction_id = $2")
            .bind(status.as_str())
            .bind(id.to_string())
            .execute(&mut *self.tx)
            .await?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn corrupt(what: &str, value: impl std::fmt::Display) -> LedgerError {
    LedgerError::Internal(format!("Invalid {} in database: {}", what, value))
}

fn parse_currency(raw: &str) -> Result<Currency, LedgerError> {
    raw.parse().map_err(|_| corrupt("currency", raw))
}

fn row_to_branch(row: &PgRow) -> Result<Branch, LedgerError> {
    Ok(Branch {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        location: row.try_get("location")?,
        governorate: row.try_get("governorate")?,
        phone_number: row.try_get("phone_number")?,
        balance_syp: row.try_get("balance_syp")?,
        balance_usd: row.try_get("balance_usd")?,
        tax_rate: row.try_get("tax_rate")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_transaction(row: &PgRow) -> Result<Transaction, LedgerError> {
    let id_str: String = row.try_get("id")?;
    let id: TransactionId = id_str
        .parse()
        .map_err(|_| corrupt("transaction id", &id_str))?;

    let status_str: String = row.try_get("status")?;
    let status: TransactionStatus = status_str
        .parse()
        .map_err(|_| corrupt("transaction status", &status_str))?;

    let currency_str: String = row.try_get("currency")?;

    let receiver_id: Option<String> = row.try_get("receiver_id")?;
    let received_by: Option<i64> = row.try_get("received_by")?;
    let received_at: Option<DateTime<Utc>> = row.try_get("received_at")?;
    let receipt = match (receiver_id, received_by, received_at) {
        (Some(receiver_id), Some(received_by), Some(received_at)) => Some(Receipt {
            receiver_id,
            receiver_address: row
                .try_get::<Option<String>, _>("receiver_address")?
                .unwrap_or_default(),
            received_by,
            received_at,
        }),
        _ => None,
    };

    Ok(Transaction {
        id,
        source: FundSource::from_nullable(row.try_get("branch_id")?),
        destination_branch_id: row.try_get("destination_branch_id")?,
        sender: Contact {
            name: row.try_get("sender_name")?,
            mobile: row.try_get("sender_mobile")?,
            governorate: row.try_get("sender_governorate")?,
            location: row.try_get("sender_location")?,
        },
        receiver: Contact {
            name: row.try_get("receiver_name")?,
            mobile: row.try_get("receiver_mobile")?,
            governorate: row.try_get("receiver_governorate")?,
            location: row.try_get("receiver_location")?,
        },
        amount: row.try_get("amount")?,
        base_amount: row.try_get("base_amount")?,
        benefited_amount: row.try_get("benefited_amount")?,
        currency: parse_currency(&currency_str)?,
        tax_rate: row.try_get("tax_rate")?,
        tax_amount: row.try_get("tax_amount")?,
        message: row.try_get("message")?,
        employee_id: row.try_get("employee_id")?,
        employee_name: row.try_get("employee_name")?,
        branch_governorate: row.try_get("branch_governorate")?,
        status,
        is_received: row.try_get("is_received")?,
        receipt,
        date: row.try_get("date")?,
    })
}

fn row_to_fund_record(row: &PgRow) -> Result<FundHistoryRecord, LedgerError> {
    let kind_str: String = row.try_get("type")?;
    let currency_str: String = row.try_get("currency")?;

    Ok(FundHistoryRecord {
        id: row.try_get("id")?,
        branch_id: row.try_get("branch_id")?,
        amount: row.try_get("amount")?,
        kind: kind_str.parse().map_err(|_| corrupt("fund type", &kind_str))?,
        currency: parse_currency(&currency_str)?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_profit(row: &PgRow) -> Result<ProfitRecord, LedgerError> {
    let transaction_str: String = row.try_get("transaction_id")?;
    let source_str: String = row.try_get("source_type")?;
    let currency_str: String = row.try_get("currency")?;

    Ok(ProfitRecord {
        id: row.try_get("id")?,
        beneficiary: FundSource::from_nullable(row.try_get("branch_id")?),
        transaction_id: transaction_str
            .parse()
            .map_err(|_| corrupt("transaction id", &transaction_str))?,
        profit_amount: row.try_get("profit_amount")?,
        currency: parse_currency(&currency_str)?,
        source_type: source_str
            .parse()
            .map_err(|_| corrupt("profit source", &source_str))?,
        date: row.try_get("date")?,
    })
}

fn row_to_notification(row: &PgRow) -> Result<Notification, LedgerError> {
    let transaction_str: String = row.try_get("transaction_id")?;
    let status_str: String = row.try_get("status")?;

    Ok(Notification {
        id: row.try_get("id")?,
        transaction_id: transaction_str
            .parse()
            .map_err(|_| corrupt("transaction id", &transaction_str))?,
        recipient_phone: row.try_get("recipient_phone")?,
        message: row.try_get("message")?,
        status: status_str.parse()?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_clause() {
        assert_eq!(lock_clause(LockMode::ForUpdate), " FOR UPDATE");
        assert_eq!(lock_clause(LockMode::Shared), " FOR SHARE");
    }

    #[test]
    fn test_corrupt_rows_are_internal() {
        let err = parse_currency("EUR").unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }
}
