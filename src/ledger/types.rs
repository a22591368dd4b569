//! Ledger Core Types
//!
//! Records held by the balance store and the requests that mutate them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::money::{BalanceAccount, Currency};

use super::state::{NotificationStatus, TransactionStatus};

pub type BranchId = i64;
pub type UserId = i64;

/// Reserved id of the synthetic, funds-unconstrained sender
pub const SYSTEM_MANAGER_ID: BranchId = 0;

// ============================================================================
// Identifiers
// ============================================================================

/// Transaction identifier - ULID, sortable by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TransactionId(ulid::Ulid);

impl TransactionId {
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl From<TransactionId> for String {
    fn from(id: TransactionId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for TransactionId {
    type Error = ulid::DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Where the money of a transfer comes from
///
/// The System Manager never pays: it is not a persisted branch, has no
/// balance, and skips every allocation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FundSource {
    Branch(BranchId),
    SystemManager,
}

impl FundSource {
    pub fn from_branch_id(id: BranchId) -> Self {
        if id == SYSTEM_MANAGER_ID {
            FundSource::SystemManager
        } else {
            FundSource::Branch(id)
        }
    }

    /// Nullable form used by storage
    pub fn from_nullable(id: Option<BranchId>) -> Self {
        id.map_or(FundSource::SystemManager, FundSource::from_branch_id)
    }

    #[inline]
    pub fn branch_id(&self) -> Option<BranchId> {
        match self {
            FundSource::Branch(id) => Some(*id),
            FundSource::SystemManager => None,
        }
    }
}

impl fmt::Display for FundSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FundSource::Branch(id) => write!(f, "branch {}", id),
            FundSource::SystemManager => write!(f, "System Manager"),
        }
    }
}

// ============================================================================
// Caller
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Director,
    BranchManager,
    Employee,
}

/// Authorization decision resolved upstream; trusted as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub branch_id: Option<BranchId>,
    pub role: Role,
}

impl Actor {
    pub fn director(user_id: UserId) -> Self {
        Self {
            user_id,
            branch_id: None,
            role: Role::Director,
        }
    }

    pub fn branch_manager(user_id: UserId, branch_id: BranchId) -> Self {
        Self {
            user_id,
            branch_id: Some(branch_id),
            role: Role::BranchManager,
        }
    }

    pub fn employee(user_id: UserId, branch_id: BranchId) -> Self {
        Self {
            user_id,
            branch_id: Some(branch_id),
            role: Role::Employee,
        }
    }

    #[inline]
    pub fn is_director(&self) -> bool {
        self.role == Role::Director
    }
}

// ============================================================================
// Branch
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub code: String,
    pub name: String,
    pub location: String,
    pub governorate: String,
    pub phone_number: String,
    pub balance_syp: Decimal,
    pub balance_usd: Decimal,
    /// Percentage in [0, 100] applied to the benefited amount of new transfers
    pub tax_rate: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    #[inline]
    pub fn balance(&self, account: BalanceAccount) -> Decimal {
        match account {
            BalanceAccount::Syp => self.balance_syp,
            BalanceAccount::Usd => self.balance_usd,
        }
    }

    pub(crate) fn balance_mut(&mut self, account: BalanceAccount) -> &mut Decimal {
        match account {
            BalanceAccount::Syp => &mut self.balance_syp,
            BalanceAccount::Usd => &mut self.balance_usd,
        }
    }
}

/// Seed data for a branch
#[derive(Debug, Clone, Default)]
pub struct NewBranch {
    pub code: String,
    pub name: String,
    pub location: String,
    pub governorate: String,
    pub phone_number: String,
    pub balance_syp: Decimal,
    pub balance_usd: Decimal,
    pub tax_rate: Decimal,
}

impl NewBranch {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_balances(mut self, syp: Decimal, usd: Decimal) -> Self {
        self.balance_syp = syp;
        self.balance_usd = usd;
        self
    }

    pub fn with_tax_rate(mut self, tax_rate: Decimal) -> Self {
        self.tax_rate = tax_rate;
        self
    }
}

// ============================================================================
// Fund History
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundKind {
    Allocation,
    Deduction,
    Refund,
}

impl FundKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundKind::Allocation => "allocation",
            FundKind::Deduction => "deduction",
            FundKind::Refund => "refund",
        }
    }
}

impl fmt::Display for FundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FundKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allocation" => Ok(FundKind::Allocation),
            "deduction" => Ok(FundKind::Deduction),
            "refund" => Ok(FundKind::Refund),
            _ => Err(format!("Invalid fund kind: {}", s)),
        }
    }
}

/// Immutable entry for one balance mutation. `amount` is signed:
/// positive credits the branch, negative debits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundHistoryRecord {
    pub id: i64,
    pub branch_id: BranchId,
    pub amount: Decimal,
    pub kind: FundKind,
    pub currency: Currency,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFundRecord {
    pub branch_id: BranchId,
    pub amount: Decimal,
    pub kind: FundKind,
    pub currency: Currency,
    pub description: String,
}

// ============================================================================
// Profit
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitSource {
    BenefitedAmount,
    Tax,
}

impl ProfitSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfitSource::BenefitedAmount => "benefited_amount",
            ProfitSource::Tax => "tax",
        }
    }
}

impl FromStr for ProfitSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "benefited_amount" => Ok(ProfitSource::BenefitedAmount),
            "tax" => Ok(ProfitSource::Tax),
            _ => Err(format!("Invalid profit source: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitRecord {
    pub id: i64,
    /// Sending side of the transaction
    pub beneficiary: FundSource,
    pub transaction_id: TransactionId,
    pub profit_amount: Decimal,
    pub currency: Currency,
    pub source_type: ProfitSource,
    /// Original transaction date, not the completion date
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewProfitRecord {
    pub beneficiary: FundSource,
    pub transaction_id: TransactionId,
    pub profit_amount: Decimal,
    pub currency: Currency,
    pub source_type: ProfitSource,
    pub date: DateTime<Utc>,
}

// ============================================================================
// Notification
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub transaction_id: TransactionId,
    pub recipient_phone: String,
    pub message: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub transaction_id: TransactionId,
    pub recipient_phone: String,
    pub message: String,
}

// ============================================================================
// Transaction
// ============================================================================

/// Person on either end of a transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub mobile: String,
    pub governorate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Contact {
    pub fn new(name: impl Into<String>, mobile: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mobile: mobile.into(),
            ..Default::default()
        }
    }
}

/// Pickup metadata, present only once the receiving branch confirms receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub receiver_id: String,
    pub receiver_address: String,
    pub received_by: UserId,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub source: FundSource,
    pub destination_branch_id: BranchId,
    pub sender: Contact,
    pub receiver: Contact,
    /// Face value moved between branches
    pub amount: Decimal,
    pub base_amount: Decimal,
    /// Margin on which profit and tax are computed
    pub benefited_amount: Decimal,
    pub currency: Currency,
    /// Sending branch rate captured at creation; never recomputed
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
    pub message: String,
    pub employee_id: Option<UserId>,
    pub employee_name: String,
    pub branch_governorate: String,
    pub status: TransactionStatus,
    pub is_received: bool,
    pub receipt: Option<Receipt>,
    pub date: DateTime<Utc>,
}

/// Transfer request as handed over by the API layer
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub destination_branch_id: BranchId,
    pub sender: Contact,
    pub receiver: Contact,
    pub amount: Decimal,
    pub base_amount: Decimal,
    pub benefited_amount: Decimal,
    pub currency: Currency,
    /// Advisory only; replaced by the sending branch's current rate
    pub tax_rate: Option<Decimal>,
    /// Advisory only; replaced by the computed tax
    pub tax_amount: Option<Decimal>,
    pub message: String,
    pub employee_name: String,
    pub branch_governorate: String,
    pub date: Option<DateTime<Utc>>,
}

impl TransferRequest {
    pub fn new(destination_branch_id: BranchId, amount: Decimal, currency: Currency) -> Self {
        Self {
            destination_branch_id,
            sender: Contact::default(),
            receiver: Contact::default(),
            amount,
            base_amount: amount,
            benefited_amount: Decimal::ZERO,
            currency,
            tax_rate: None,
            tax_amount: None,
            message: String::new(),
            employee_name: String::new(),
            branch_governorate: String::new(),
            date: None,
        }
    }

    pub fn with_benefited(mut self, benefited_amount: Decimal) -> Self {
        self.benefited_amount = benefited_amount;
        self
    }

    pub fn with_parties(mut self, sender: Contact, receiver: Contact) -> Self {
        self.sender = sender;
        self.receiver = receiver;
        self
    }
}

/// Receiving branch's confirmation that the receiver collected the money
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiptConfirmation {
    pub transaction_id: TransactionId,
    pub receiver: Contact,
    pub receiver_id: String,
    pub receiver_address: String,
}

/// Row lock requested for a point lookup inside a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    ForUpdate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fund_source_from_id() {
        assert_eq!(FundSource::from_branch_id(0), FundSource::SystemManager);
        assert_eq!(FundSource::from_branch_id(4), FundSource::Branch(4));
        assert_eq!(FundSource::from_nullable(None), FundSource::SystemManager);
        assert_eq!(FundSource::SystemManager.branch_id(), None);
        assert_eq!(FundSource::Branch(4).to_string(), "branch 4");
    }

    #[test]
    fn test_transaction_id_roundtrip() {
        let id = TransactionId::new();
        let parsed: TransactionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<TransactionId>().is_err());
    }

    #[test]
    fn test_transaction_id_serializes_as_string() {
        let id = TransactionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn test_fund_kind_parse() {
        assert_eq!("refund".parse::<FundKind>().unwrap(), FundKind::Refund);
        assert!("bonus".parse::<FundKind>().is_err());
    }
}
