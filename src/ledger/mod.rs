//! Fund Ledger Engine
//!
//! Moves money between branches without ever creating, destroying or
//! double-counting it.
//!
//! # Architecture
//!
//! ```text
//! TransferOrchestrator ──┐
//! StatusTransitionEngine ├──► LedgerStore::begin() ──► LedgerUnit (one atomic unit)
//! AllocationDesk ────────┘          │                     │
//!                                   │                     └── commit ──► CacheInvalidator
//! LedgerReader ─────────────────────┘ (lock-free reads)
//! ```
//!
//! # Invariants
//!
//! 1. **Atomic units**: balances, fund records, the transaction row and its
//!    notification change together or not at all
//! 2. **Balance floor**: no committed mutation leaves a balance below zero
//! 3. **One record per mutation**: every balance change writes exactly one
//!    signed fund record
//! 4. **Conservation**: per account, the sum of all balances equals the sum
//!    of allocation and deduction records
//! 5. **Lock order**: transaction row, then branch rows in ascending id
//! 6. **Cache after commit**: invalidation never precedes durability

pub mod allocation;
pub mod cache;
pub mod engine;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod pg;
pub mod profit;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod transition;
pub mod types;


// Re-exports for convenience
pub use allocation::{AdjustmentOutcome, AllocationDesk, AllocationOp};
pub use cache::{CacheInvalidator, CacheKeys, LoggingInvalidator, RecordingInvalidator};
pub use engine::FundLedger;
pub use error::{ErrorKind, LedgerError};
pub use memory::{FailPoint, MemoryLedgerStore};
pub use orchestrator::TransferOrchestrator;
pub use pg::PgLedgerStore;
pub use profit::{ProfitRecorder, ProfitSplit};
pub use snapshot::LedgerReader;
pub use state::{NotificationStatus, TransactionStatus, TransitionEffect};
pub use store::{LedgerStore, LedgerUnit};
pub use transition::{StatusTransitionEngine, TransitionOutcome};
pub use types::{
    Actor, Branch, BranchId, Contact, FundHistoryRecord, FundKind, FundSource, NewBranch,
    Notification, ProfitRecord, ProfitSource, Receipt, ReceiptConfirmation, Role,
    SYSTEM_MANAGER_ID, Transaction, TransactionId, TransferRequest, UserId,
};
