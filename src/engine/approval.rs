//! Admin resolution of pending deposits, withdrawals and loans.

use chrono::{DateTime, Utc};
use tracing::info;

use super::{Engine, ResolveError};
use crate::Amount;
use crate::model::{AccountId, Decision, EvidenceRef, InstrumentKind, Status};
use crate::outbox::{Email, EmailTemplate, SideEffect};
use crate::store::UnitOfWork;

/// A committed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub kind: InstrumentKind,
    pub id: u64,
    pub account: AccountId,
    pub amount: Amount,
    pub status: Status,
    /// Account balance right after the resolution.
    pub balance: Amount,
}

/// What the committed unit decided, plus what the side effects need.
struct Resolved {
    resolution: Resolution,
    recipient: String,
    evidence: Option<EvidenceRef>,
    /// Balance that made a withdrawal approval fall back to a decline.
    shortfall: Option<Amount>,
}

/// A pending instrument as seen at the start of a resolution.
struct Pending {
    account: AccountId,
    amount: Amount,
    evidence: Option<EvidenceRef>,
}

impl Engine {
    /// Apply an admin decision to one pending instrument, exactly once.
    ///
    /// The balance effect, the status change and the user notification commit
    /// together. Approving a withdrawal the account can no longer cover
    /// declines it instead and fails with [`ResolveError::InsufficientFunds`].
    pub async fn resolve(
        &self,
        id: u64,
        kind: InstrumentKind,
        decision: Decision,
    ) -> Result<Resolution, ResolveError> {
        let now = self.now();
        let result = self
            .store()
            .atomically(|work| resolve_unit(work, id, kind, decision, now))
            .await;

        let resolved = match result {
            Ok(resolved) => resolved,
            Err(e) => {
                info!(kind = %kind, id, reason = %e, "resolution skipped");
                return Err(e);
            }
        };

        let Resolved {
            resolution,
            recipient,
            evidence,
            shortfall,
        } = resolved;

        info!(
            kind = %kind,
            id,
            account = resolution.account,
            amount = %resolution.amount,
            status = %resolution.status,
            "resolution applied"
        );

        if let Some(template) = EmailTemplate::for_resolution(kind, resolution.status) {
            self.outbox().enqueue(SideEffect::Email(Email {
                template,
                recipient,
                account: resolution.account,
                reference: id,
                amount: resolution.amount,
            }));
        }
        // evidence of approved deposits is kept
        if resolution.status == Status::Declined {
            if let Some(evidence) = evidence {
                self.outbox().enqueue(SideEffect::DeleteEvidence(evidence));
            }
        }

        match shortfall {
            Some(available) => Err(ResolveError::InsufficientFunds(
                resolution.account,
                available,
                resolution.amount,
            )),
            None => Ok(resolution),
        }
    }
}

/// Resolve one instrument inside an atomic unit:
/// - Find the instrument, matching `kind`
/// - Ensure it is still pending
/// - Compute the new balance (an uncoverable withdrawal becomes a decline)
/// - Write balance, status and notification
fn resolve_unit(
    work: &mut UnitOfWork<'_>,
    id: u64,
    kind: InstrumentKind,
    decision: Decision,
    now: DateTime<Utc>,
) -> Result<Resolved, ResolveError> {
    let pending = pending_instrument(work, id, kind)?;
    let account = work
        .account(pending.account)
        .ok_or(ResolveError::AccountNotFound(pending.account))?;
    let balance = account.balance;
    let recipient = account.email.clone();

    let mut shortfall = None;
    let (status, new_balance) = match (kind, decision) {
        (_, Decision::Decline) => (Status::Declined, balance),
        (InstrumentKind::Deposit | InstrumentKind::Loan, Decision::Approve) => (
            Status::Approved,
            balance
                .checked_add(pending.amount)
                .ok_or(ResolveError::Overflow(pending.account))?,
        ),
        (InstrumentKind::Withdrawal, Decision::Approve) => {
            // the balance may have moved since the request was filed
            if balance < pending.amount {
                shortfall = Some(balance);
                (Status::Declined, balance)
            } else {
                (Status::Approved, balance - pending.amount)
            }
        }
    };

    if new_balance != balance {
        work.account_mut(pending.account)
            .ok_or(ResolveError::AccountNotFound(pending.account))?
            .balance = new_balance;
    }
    set_status(work, id, kind, status, now)?;
    work.notify(
        pending.account,
        notification_message(kind, pending.amount, status, shortfall.is_some()),
        now,
    );

    Ok(Resolved {
        resolution: Resolution {
            kind,
            id,
            account: pending.account,
            amount: pending.amount,
            status,
            balance: new_balance,
        },
        recipient,
        evidence: pending.evidence,
        shortfall,
    })
}

fn pending_instrument(
    work: &UnitOfWork<'_>,
    id: u64,
    kind: InstrumentKind,
) -> Result<Pending, ResolveError> {
    let (status, pending) = match kind.transaction_type() {
        Some(expected) => {
            let tx = work
                .transaction(id)
                .filter(|tx| tx.kind == expected)
                .ok_or(ResolveError::NotFound(kind, id))?;
            let pending = Pending {
                account: tx.account,
                amount: tx.amount,
                evidence: tx.evidence.clone(),
            };
            (tx.status, pending)
        }
        None => {
            let loan = work.loan(id).ok_or(ResolveError::NotFound(kind, id))?;
            let pending = Pending {
                account: loan.account,
                amount: loan.amount,
                evidence: None,
            };
            (loan.status, pending)
        }
    };

    if status.is_terminal() {
        return Err(ResolveError::AlreadyResolved(kind, id, status));
    }
    Ok(pending)
}

fn set_status(
    work: &mut UnitOfWork<'_>,
    id: u64,
    kind: InstrumentKind,
    status: Status,
    now: DateTime<Utc>,
) -> Result<(), ResolveError> {
    let not_found = ResolveError::NotFound(kind, id);
    if kind == InstrumentKind::Loan {
        let loan = work.loan_mut(id).ok_or(not_found)?;
        loan.status = status;
        loan.updated_at = now;
    } else {
        let tx = work.transaction_mut(id).ok_or(not_found)?;
        tx.status = status;
        tx.updated_at = now;
    }
    Ok(())
}

fn notification_message(
    kind: InstrumentKind,
    amount: Amount,
    status: Status,
    insufficient: bool,
) -> String {
    let subject = match kind {
        InstrumentKind::Loan => format!("Your loan request for ${amount}"),
        other => format!("Your {other} of ${amount}"),
    };
    if insufficient {
        format!("{subject} has been {status} due to insufficient balance.")
    } else {
        format!("{subject} has been {status}.")
    }
}
