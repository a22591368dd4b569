//! Transaction Status State Machine
//!
//! ```text
//!              ┌────────────► COMPLETED ──────────┐
//!              │  record profit       refund +    │
//! PROCESSING ──┤                      reverse     ▼
//!              │  refund              profit   CANCELLED / REJECTED
//!              └──────────────────────────────►   (terminal)
//! ```
//!
//! Funds move at initiation, so completion only books profit. Leaving
//! PROCESSING or COMPLETED for CANCELLED/REJECTED refunds the sender and
//! deletes any profit booked for the transaction.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::LedgerError;

/// Transaction lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Processing,
    Completed,
    Cancelled,
    Rejected,
}

impl TransactionStatus {
    /// Cancelled and rejected transactions accept no further effects.
    /// Completed is deliberately not terminal.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Cancelled | TransactionStatus::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Rejected => "rejected",
        }
    }

    /// Delivery status the linked notification takes on after a transition
    pub fn notification_status(&self) -> NotificationStatus {
        match self {
            TransactionStatus::Completed => NotificationStatus::Sent,
            TransactionStatus::Cancelled | TransactionStatus::Rejected => {
                NotificationStatus::Failed
            }
            TransactionStatus::Processing => NotificationStatus::Pending,
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "processing" => Ok(TransactionStatus::Processing),
            "completed" => Ok(TransactionStatus::Completed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            "rejected" => Ok(TransactionStatus::Rejected),
            _ => Err(LedgerError::InvalidStatus(s.to_string())),
        }
    }
}

/// Notification delivery status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }
}

impl FromStr for NotificationStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            other => Err(LedgerError::Internal(format!(
                "Unknown notification status: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Side effect paired with a status edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionEffect {
    /// processing → completed
    RecordProfit,
    /// processing → cancelled | rejected. Also clears profit left behind
    /// by an overwritten completion.
    Refund,
    /// completed → cancelled | rejected
    RefundAndReverseProfit,
    /// Any other edge: status is overwritten, nothing else happens
    Unguarded,
}

impl TransitionEffect {
    pub fn plan(from: TransactionStatus, to: TransactionStatus) -> Self {
        use TransactionStatus::*;
        match (from, to) {
            (Processing, Completed) => TransitionEffect::RecordProfit,
            (Processing, Cancelled | Rejected) => TransitionEffect::Refund,
            (Completed, Cancelled | Rejected) => TransitionEffect::RefundAndReverseProfit,
            _ => TransitionEffect::Unguarded,
        }
    }

    #[inline]
    pub fn refunds(&self) -> bool {
        matches!(
            self,
            TransitionEffect::Refund | TransitionEffect::RefundAndReverseProfit
        )
    }
}
