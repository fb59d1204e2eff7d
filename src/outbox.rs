//! Side effects executed after a ledger unit has committed.
//!
//! The engine never talks to mail servers or evidence storage directly: it
//! enqueues a [`SideEffect`] once its unit is durable, and a [`Dispatcher`]
//! drains the queue on its own task. Delivery failures are logged and dropped;
//! they can never reach back into ledger state.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{info, warn};

use crate::Amount;
use crate::model::{AccountId, EvidenceRef, InstrumentKind, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    DepositApproved,
    DepositDeclined,
    WithdrawalApproved,
    WithdrawalDeclined,
    LoanApproved,
    LoanDeclined,
}

impl EmailTemplate {
    /// Template announcing that an instrument of `kind` reached `status`.
    /// `None` while the instrument is still pending.
    pub fn for_resolution(kind: InstrumentKind, status: Status) -> Option<Self> {
        use EmailTemplate::*;
        match (kind, status) {
            (_, Status::Pending) => None,
            (InstrumentKind::Deposit, Status::Approved) => Some(DepositApproved),
            (InstrumentKind::Deposit, Status::Declined) => Some(DepositDeclined),
            (InstrumentKind::Withdrawal, Status::Approved) => Some(WithdrawalApproved),
            (InstrumentKind::Withdrawal, Status::Declined) => Some(WithdrawalDeclined),
            (InstrumentKind::Loan, Status::Approved) => Some(LoanApproved),
            (InstrumentKind::Loan, Status::Declined) => Some(LoanDeclined),
        }
    }

    pub fn subject(self) -> &'static str {
        match self {
            EmailTemplate::DepositApproved => "Deposit approved",
            EmailTemplate::DepositDeclined => "Deposit declined",
            EmailTemplate::WithdrawalApproved => "Withdrawal approved",
            EmailTemplate::WithdrawalDeclined => "Withdrawal declined",
            EmailTemplate::LoanApproved => "Loan approved",
            EmailTemplate::LoanDeclined => "Loan declined",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub template: EmailTemplate,
    pub recipient: String,
    pub account: AccountId,
    /// Id of the resolved transaction or loan.
    pub reference: u64,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    Email(Email),
    DeleteEvidence(EvidenceRef),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("email delivery failed: {0}")]
    Email(String),
    #[error("evidence deletion failed: {0}")]
    Evidence(String),
}

/// Email delivery collaborator.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), DispatchError>;
}

/// Remote storage holding deposit evidence.
#[async_trait]
pub trait EvidenceStore: Send + Sync {
    async fn delete(&self, evidence: &EvidenceRef) -> Result<(), DispatchError>;
}

/// Mailer that only records what it would have sent.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), DispatchError> {
        info!(
            recipient = %email.recipient,
            subject = email.template.subject(),
            amount = %email.amount,
            "email sent"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvidenceStore;

#[async_trait]
impl EvidenceStore for LogEvidenceStore {
    async fn delete(&self, evidence: &EvidenceRef) -> Result<(), DispatchError> {
        info!(evidence = %evidence, "evidence deleted");
        Ok(())
    }
}

pub type OutboxReceiver = mpsc::UnboundedReceiver<SideEffect>;

/// Producer side of the side-effect queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: mpsc::UnboundedSender<SideEffect>,
}

impl Outbox {
    pub fn channel() -> (Outbox, OutboxReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Outbox { sender }, receiver)
    }

    /// Queue `effect`. Never fails; a closed queue only loses the effect.
    pub fn enqueue(&self, effect: SideEffect) {
        if let Err(mpsc::error::SendError(effect)) = self.sender.send(effect) {
            warn!(?effect, "outbox closed, side effect dropped");
        }
    }
}

/// Consumer side of the side-effect queue.
pub struct Dispatcher<M, S> {
    mailer: M,
    evidence: S,
}

impl<M: Mailer, S: EvidenceStore> Dispatcher<M, S> {
    pub fn new(mailer: M, evidence: S) -> Self {
        Self { mailer, evidence }
    }

    /// Drain the queue until every [`Outbox`] handle is dropped.
    pub async fn run(&self, receiver: OutboxReceiver) {
        let mut effects = UnboundedReceiverStream::new(receiver);
        while let Some(effect) = effects.next().await {
            // failures are already logged, keep draining
            let _ = self.dispatch(effect).await;
        }
    }

    pub async fn dispatch(&self, effect: SideEffect) -> Result<(), DispatchError> {
        let result = match &effect {
            SideEffect::Email(email) => self.mailer.send(email).await,
            SideEffect::DeleteEvidence(evidence) => self.evidence.delete(evidence).await,
        };
        if let Err(e) = &result {
            warn!(?effect, reason = %e, "side effect failed");
        }
        result
    }
}
