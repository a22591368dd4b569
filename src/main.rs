//! Fund Ledger - service bootstrap
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│ Logging  │───▶│ Postgres │───▶│  Ledger  │
//! │  (YAML)  │    │(tracing) │    │ (schema) │    │ (engine) │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Usage: `fund_ledger [--env <env>] [--init-schema]`
//!
//! Bootstrap only: applies the schema, checks the database and verifies the
//! ledger wires up against it, then exits. The ledger itself is a library;
//! the API layer that serves requests embeds [`fund_ledger::FundLedger`].

use anyhow::Context;

use fund_ledger::config::AppConfig;
use fund_ledger::db::Database;
use fund_ledger::ledger::FundLedger;

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn use_init_schema() -> bool {
    std::env::args().any(|a| a == "--init-schema")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = fund_ledger::logging::init_logging(&app_config);

    tracing::info!(
        git_hash = env!("GIT_HASH"),
        "Starting Fund Ledger in {} mode",
        env
    );

    let postgres_url = app_config
        .postgres_url
        .as_deref()
        .context("postgres_url is not configured")?;

    let db = Database::connect(postgres_url, &app_config.ledger)
        .await
        .context("Failed to connect to PostgreSQL")?;

    if use_init_schema() {
        db.init_schema().await?;
    }

    db.health_check()
        .await
        .context("PostgreSQL health check failed")?;

    let ledger = FundLedger::with_postgres(&db, &app_config.ledger);
    tracing::info!(
        store = ledger.store_name(),
        strict_transitions = app_config.ledger.strict_transitions,
        lock_timeout_ms = app_config.ledger.lock_timeout_ms,
        "Fund ledger wiring verified"
    );

    Ok(())
}
