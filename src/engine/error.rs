//! Error types for ledger operations.

use thiserror::Error;

use crate::Amount;
use crate::model::{AccountId, InstrumentKind, NotificationId, Status};
use crate::store::StorageError;

/// Top-level error returned by [`Engine::apply`](super::Engine::apply).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("request failed: {0}")]
    Request(#[from] RequestError),

    #[error("resolution failed: {0}")]
    Resolve(#[from] ResolveError),

    #[error("purchase failed: {0}")]
    Purchase(#[from] PurchaseError),

    #[error("settlement aborted: {0}")]
    Settlement(#[from] SettlementError),

    #[error("{0}")]
    Notification(#[from] NotificationError),
}

/// Error while filing a deposit, withdrawal or loan request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),
    #[error("a reason is required")]
    MissingReason,
    #[error("an email is required")]
    MissingEmail,
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("insufficient funds on account {0}: available {1}, requested {2}")]
    InsufficientFunds(AccountId, Amount, Amount),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Error while resolving a pending instrument.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{0} {1} not found")]
    NotFound(InstrumentKind, u64),
    #[error("{0} {1} is already {2}")]
    AlreadyResolved(InstrumentKind, u64, Status),
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    /// The withdrawal has been declined as a consequence.
    #[error(
        "insufficient funds on account {0}: available {1}, requested {2}; withdrawal declined"
    )]
    InsufficientFunds(AccountId, Amount, Amount),
    #[error("balance of account {0} would overflow")]
    Overflow(AccountId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Error while purchasing an investment plan.
#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("unknown plan '{0}'")]
    UnknownPlan(String),
    #[error(
        "investment amount must be {} for the {plan} plan, got ${requested}",
        bounds(.min, .max)
    )]
    OutOfRange {
        plan: String,
        min: Amount,
        max: Option<Amount>,
        requested: Amount,
    },
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("insufficient funds on account {0}: available {1}, requested {2}")]
    InsufficientFunds(AccountId, Amount, Amount),
    #[error("returns for {0} overflow")]
    Overflow(Amount),
    #[error("plan {plan} runs for {days} days, past the supported calendar")]
    MaturityOutOfRange { plan: String, days: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn bounds(min: &Amount, max: &Option<Amount>) -> String {
    match max {
        Some(max) => format!("between ${min} and ${max}"),
        None => format!("at least ${min}"),
    }
}

/// A settlement tick that could not run to completion.
///
/// Rows settled before the failure stay settled.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Per-row settlement anomaly; the row is skipped, the batch continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettlementAnomaly {
    #[error("invalid returns {0}")]
    InvalidReturns(Amount),
    #[error("account {0} not found")]
    AccountNotFound(AccountId),
    #[error("balance of account {0} would overflow")]
    Overflow(AccountId),
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("notification {0} not found for account {1}")]
    NotFound(NotificationId, AccountId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
