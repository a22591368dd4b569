//! Fund Ledger - inter-branch money transfer engine
//!
//! # Modules
//!
//! - [`money`] - Currencies, balance accounts and tax arithmetic
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and schema
//! - [`ledger`] - Transfers, status transitions, profit and allocations

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod money;

// Convenient re-exports at crate root
pub use config::{AppConfig, LedgerConfig};
pub use ledger::{
    Actor, AllocationOp, FundLedger, LedgerError, LedgerReader, LedgerStore, MemoryLedgerStore,
    PgLedgerStore, TransactionId, TransactionStatus, TransferRequest,
};
pub use money::{BalanceAccount, Currency, TaxRate};
