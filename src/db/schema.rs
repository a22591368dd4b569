use anyhow::Result;
use sqlx::PgPool;

/// Create ledger tables if they do not exist yet
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing ledger schema...");

    for (name, ddl) in [
        ("branches", CREATE_BRANCHES_TABLE),
        ("transactions", CREATE_TRANSACTIONS_TABLE),
        ("fund_history", CREATE_FUND_HISTORY_TABLE),
        ("notifications", CREATE_NOTIFICATIONS_TABLE),
        ("branch_profits", CREATE_BRANCH_PROFITS_TABLE),
    ] {
        sqlx::raw_sql(ddl)
            .execute(pool)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {} table: {}", name, e))?;
    }

    tracing::info!("Ledger schema initialized successfully");
    Ok(())
}

// Ids start at 1; 0 is the System Manager and is never stored.
pub const CREATE_BRANCHES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS branches (
    id            BIGSERIAL PRIMARY KEY,
    code          TEXT NOT NULL UNIQUE,
    name          TEXT NOT NULL,
    location      TEXT NOT NULL DEFAULT '',
    governorate   TEXT NOT NULL DEFAULT '',
    phone_number  TEXT NOT NULL DEFAULT '',
    balance_syp   NUMERIC(30, 8) NOT NULL DEFAULT 0,
    balance_usd   NUMERIC(30, 8) NOT NULL DEFAULT 0,
    tax_rate      NUMERIC(5, 2) NOT NULL DEFAULT 0,
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CONSTRAINT balance_syp_non_negative CHECK (balance_syp >= 0),
    CONSTRAINT balance_usd_non_negative CHECK (balance_usd >= 0),
    CONSTRAINT tax_rate_range CHECK (tax_rate >= 0 AND tax_rate <= 100),
    CONSTRAINT system_manager_reserved CHECK (id <> 0)
);
"#;

pub const CREATE_TRANSACTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id                     TEXT PRIMARY KEY,
    branch_id              BIGINT REFERENCES branches(id),
    destination_branch_id  BIGINT NOT NULL REFERENCES branches(id),
    sender_name            TEXT NOT NULL DEFAULT '',
    sender_mobile          TEXT NOT NULL DEFAULT '',
    sender_governorate     TEXT NOT NULL DEFAULT '',
    sender_location        TEXT,
    receiver_name          TEXT NOT NULL DEFAULT '',
    receiver_mobile        TEXT NOT NULL DEFAULT '',
    receiver_governorate   TEXT NOT NULL DEFAULT '',
    receiver_location      TEXT,
    amount                 NUMERIC(30, 8) NOT NULL CHECK (amount > 0),
    base_amount            NUMERIC(30, 8) NOT NULL DEFAULT 0 CHECK (base_amount >= 0),
    benefited_amount       NUMERIC(30, 8) NOT NULL DEFAULT 0 CHECK (benefited_amount >= 0),
    currency               TEXT NOT NULL,
    tax_rate               NUMERIC(5, 2) NOT NULL DEFAULT 0,
    tax_amount             NUMERIC(30, 8) NOT NULL DEFAULT 0,
    message                TEXT NOT NULL DEFAULT '',
    employee_id            BIGINT,
    employee_name          TEXT NOT NULL DEFAULT '',
    branch_governorate     TEXT NOT NULL DEFAULT '',
    status                 TEXT NOT NULL
        CHECK (status IN ('processing', 'completed', 'cancelled', 'rejected')),
    is_received            BOOLEAN NOT NULL DEFAULT FALSE,
    receiver_id            TEXT,
    receiver_address       TEXT,
    received_by            BIGINT,
    received_at            TIMESTAMPTZ,
    date                   TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_transactions_branch ON transactions(branch_id);
CREATE INDEX IF NOT EXISTS idx_transactions_destination ON transactions(destination_branch_id);
"#;

pub const CREATE_FUND_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS fund_history (
    id           BIGSERIAL PRIMARY KEY,
    branch_id    BIGINT NOT NULL REFERENCES branches(id),
    amount       NUMERIC(30, 8) NOT NULL,
    type         TEXT NOT NULL CHECK (type IN ('allocation', 'deduction', 'refund')),
    currency     TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_fund_history_branch ON fund_history(branch_id, id DESC);
"#;

pub const CREATE_NOTIFICATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS notifications (
    id               BIGSERIAL PRIMARY KEY,
    transaction_id   TEXT NOT NULL REFERENCES transactions(id),
    recipient_phone  TEXT NOT NULL DEFAULT '',
    message          TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'sent', 'failed')),
    created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS idx_notifications_transaction ON notifications(transaction_id);
"#;

// NULL branch_id credits the System Manager
pub const CREATE_BRANCH_PROFITS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS branch_profits (
    id              BIGSERIAL PRIMARY KEY,
    branch_id       BIGINT REFERENCES branches(id),
    transaction_id  TEXT NOT NULL REFERENCES transactions(id),
    profit_amount   NUMERIC(30, 8) NOT NULL CHECK (profit_amount > 0),
    currency        TEXT NOT NULL,
    source_type     TEXT NOT NULL CHECK (source_type IN ('benefited_amount', 'tax')),
    date            TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_branch_profits_transaction ON branch_profits(transaction_id);
CREATE INDEX IF NOT EXISTS idx_branch_profits_branch ON branch_profits(branch_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_is_idempotent() {
        for ddl in [
            CREATE_BRANCHES_TABLE,
            CREATE_TRANSACTIONS_TABLE,
            CREATE_FUND_HISTORY_TABLE,
            CREATE_NOTIFICATIONS_TABLE,
            CREATE_BRANCH_PROFITS_TABLE,
        ] {
            for stmt in ddl.split(';').map(str::trim).filter(|s| !s.is_empty()) {
                assert!(stmt.contains("IF NOT EXISTS"), "not idempotent: {}", stmt);
            }
        }
    }

    #[test]
    fn test_balances_have_floor() {
        assert!(CREATE_BRANCHES_TABLE.contains("CHECK (balance_syp >= 0)"));
        assert!(CREATE_BRANCHES_TABLE.contains("CHECK (balance_usd >= 0)"));
    }
}
