//! Core domain records of the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Amount;

/// Account identifier.
pub type AccountId = u64;

/// Transaction identifier.
pub type TxId = u64;

/// Loan identifier.
pub type LoanId = u64;

/// Investment identifier.
pub type InvestmentId = u64;

/// Notification identifier.
pub type NotificationId = u64;

/// Opaque pointer to an externally stored proof (e.g. a deposit screenshot).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvidenceRef(pub String);

impl fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A balance-holding account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub balance: Amount,
    pub created_at: DateTime<Utc>,
}

/// Resolution state of a transaction or loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Pending,
    Approved,
    Declined,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        self != Status::Pending
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pending => "pending",
            Status::Approved => "approved",
            Status::Declined => "declined",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    /// Audit record of an investment purchase.
    Investment,
    /// Audit record of credited investment returns.
    Roi,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdrawal => "withdrawal",
            TransactionType::Investment => "investment",
            TransactionType::Roi => "roi",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxId,
    pub account: AccountId,
    pub kind: TransactionType,
    pub amount: Amount,
    pub status: Status,
    pub evidence: Option<EvidenceRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub account: AccountId,
    pub amount: Amount,
    pub reason: String,
    pub status: Status,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestmentStatus {
    #[default]
    Active,
    Completed,
}

/// A purchased plan. Terms are frozen at purchase time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub account: AccountId,
    pub plan_name: String,
    pub catalog_version: u32,
    pub amount: Amount,
    pub duration_days: u32,
    pub roi_percent: u32,
    pub returns: Amount,
    pub start_date: DateTime<Utc>,
    pub maturity_date: DateTime<Utc>,
    pub status: InvestmentStatus,
}

impl Investment {
    pub fn is_matured(&self, now: DateTime<Utc>) -> bool {
        self.status == InvestmentStatus::Active && self.maturity_date <= now
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub account: AccountId,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Kind of instrument an admin can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentKind {
    Deposit,
    Withdrawal,
    Loan,
}

impl InstrumentKind {
    /// The transaction type this kind resolves, `None` for loans.
    pub fn transaction_type(self) -> Option<TransactionType> {
        match self {
            InstrumentKind::Deposit => Some(TransactionType::Deposit),
            InstrumentKind::Withdrawal => Some(TransactionType::Withdrawal),
            InstrumentKind::Loan => None,
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstrumentKind::Deposit => "deposit",
            InstrumentKind::Withdrawal => "withdrawal",
            InstrumentKind::Loan => "loan",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Decline,
}

/// A command representing the possible inputs of the engine.
#[derive(Debug, Clone)]
pub enum Command {
    Open {
        email: String,
    },
    RequestDeposit {
        account: AccountId,
        amount: Amount,
        evidence: Option<EvidenceRef>,
    },
    RequestWithdrawal {
        account: AccountId,
        amount: Amount,
    },
    RequestLoan {
        account: AccountId,
        amount: Amount,
        reason: String,
    },
    Resolve {
        id: u64,
        kind: InstrumentKind,
        decision: Decision,
    },
    Purchase {
        account: AccountId,
        plan: String,
        amount: Amount,
    },
    /// Run settlement as of `at`, or the engine clock when absent.
    Settle {
        at: Option<DateTime<Utc>>,
    },
    MarkAllRead {
        account: AccountId,
    },
}
