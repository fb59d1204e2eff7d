//! Ledger engine.
//!
//! The engine owns every rule that moves money between an account balance and
//! its instruments: request creation (no balance effect), admin resolution of
//! deposits, withdrawals and loans, plan purchases, and maturity settlement.
//! Each balance change runs inside one store unit together with the status
//! change and notification it belongs to. Emails and evidence cleanup go
//! through the outbox once the unit has committed.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_stream::{Stream, StreamExt};
use tracing::info;

use crate::Amount;
use crate::clock::{Clock, SystemClock};
use crate::model::{
    Account, AccountId, Command, EvidenceRef, Investment, InvestmentStatus, Loan, LoanId,
    Notification, NotificationId, Status, Transaction, TransactionType, TxId,
};
use crate::outbox::Outbox;
use crate::plan::PlanCatalog;
use crate::store::Store;

mod approval;
pub use approval::Resolution;

mod investment;

mod settlement;
pub use settlement::SettlementReport;

mod error;
pub use error::{
    EngineError, NotificationError, PurchaseError, RequestError, ResolveError, SettlementAnomaly,
    SettlementError,
};

/// Filter and page selection for [`Engine::transactions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionQuery {
    pub kind: Option<TransactionType>,
    /// 1-based.
    pub page: usize,
    pub limit: usize,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            kind: None,
            page: 1,
            limit: 20,
        }
    }
}

/// Per-account overview, as printed by the command-line runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub account: AccountId,
    pub email: String,
    pub balance: Amount,
    pub active_investments: usize,
    pub unread_notifications: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionPage {
    pub transactions: Vec<Transaction>,
    pub count: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

/// The ledger engine. Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    catalog: RwLock<Arc<PlanCatalog>>,
    outbox: Outbox,
    clock: Arc<dyn Clock>,
}

/// Public API
impl Engine {
    pub fn new(store: Store, catalog: PlanCatalog, outbox: Outbox) -> Self {
        Self::with_clock(store, catalog, outbox, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Store,
        catalog: PlanCatalog,
        outbox: Outbox,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                catalog: RwLock::new(Arc::new(catalog)),
                outbox,
                clock,
            }),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    /// The catalog new purchases are priced against.
    pub async fn catalog(&self) -> Arc<PlanCatalog> {
        self.inner.catalog.read().await.clone()
    }

    /// Swap in new plan terms. Existing investments keep theirs.
    /// Returns the new catalog version.
    pub async fn replace_catalog(&self, next: PlanCatalog) -> u32 {
        let mut catalog = self.inner.catalog.write().await;
        let next = catalog.succeeded_by(next);
        let version = next.version();
        *catalog = Arc::new(next);
        info!(version, "plan catalog replaced");
        version
    }

    /// Run the engine over a stream of commands, skipping the ones that fail.
    pub async fn run(&self, mut commands: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = commands.next().await {
            // failures are logged by `apply`, a bad command must not stop the run
            let _ = self.apply(command).await;
        }
    }

    /// Apply a single command on top of the current ledger state.
    pub async fn apply(&self, command: Command) -> Result<(), EngineError> {
        let result: Result<(), EngineError> = match command {
            Command::Open { email } => self
                .open_account(email)
                .await
                .map(drop)
                .map_err(Into::into),
            Command::RequestDeposit {
                account,
                amount,
                evidence,
            } => self
                .request_deposit(account, amount, evidence)
                .await
                .map(drop)
                .map_err(Into::into),
            Command::RequestWithdrawal { account, amount } => self
                .request_withdrawal(account, amount)
                .await
                .map(drop)
                .map_err(Into::into),
            Command::RequestLoan {
                account,
                amount,
                reason,
            } => self
                .request_loan(account, amount, reason)
                .await
                .map(drop)
                .map_err(Into::into),
            Command::Resolve { id, kind, decision } => self
                .resolve(id, kind, decision)
                .await
                .map(drop)
                .map_err(Into::into),
            Command::Purchase {
                account,
                plan,
                amount,
            } => self
                .purchase(account, &plan, amount)
                .await
                .map(drop)
                .map_err(Into::into),
            Command::Settle { at } => self
                .settle_matured_at(at.unwrap_or_else(|| self.now()))
                .await
                .map(drop)
                .map_err(Into::into),
            Command::MarkAllRead { account } => self
                .mark_all_read(account)
                .await
                .map(drop)
                .map_err(Into::into),
        };
        if let Err(e) = &result {
            info!(reason = %e, "command skipped");
        }
        result
    }

    pub async fn open_account(&self, email: String) -> Result<AccountId, RequestError> {
        if email.trim().is_empty() {
            return Err(RequestError::MissingEmail);
        }
        let now = self.now();
        let id = self
            .store()
            .atomically(|work| {
                Ok::<_, RequestError>(work.insert_account(|id| Account {
                    id,
                    email,
                    balance: Amount::ZERO,
                    created_at: now,
                }))
            })
            .await?;
        info!(account = id, "account opened");
        Ok(id)
    }

    /// File a pending deposit. `evidence` points at the already uploaded proof.
    pub async fn request_deposit(
        &self,
        account: AccountId,
        amount: Amount,
        evidence: Option<EvidenceRef>,
    ) -> Result<TxId, RequestError> {
        self.file_transaction(account, TransactionType::Deposit, amount, evidence)
            .await
    }

    /// File a pending withdrawal. Funds are checked now and again at approval.
    pub async fn request_withdrawal(
        &self,
        account: AccountId,
        amount: Amount,
    ) -> Result<TxId, RequestError> {
        self.file_transaction(account, TransactionType::Withdrawal, amount, None)
            .await
    }

    pub async fn request_loan(
        &self,
        account: AccountId,
        amount: Amount,
        reason: String,
    ) -> Result<LoanId, RequestError> {
        ensure_positive(amount)?;
        if reason.trim().is_empty() {
            return Err(RequestError::MissingReason);
        }
        let now = self.now();
        let id = self
            .store()
            .atomically(|work| {
                if work.account(account).is_none() {
                    return Err(RequestError::AccountNotFound(account));
                }
                Ok(work.insert_loan(|id| Loan {
                    id,
                    account,
                    amount,
                    reason,
                    status: Status::Pending,
                    created_at: now,
                    updated_at: now,
                }))
            })
            .await?;
        info!(account, loan = id, amount = %amount, "loan requested");
        Ok(id)
    }

    pub async fn account(&self, id: AccountId) -> Option<Account> {
        self.store().read(|t| t.accounts.get(&id).cloned()).await
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.store()
            .read(|t| t.accounts.values().cloned().collect())
            .await
    }

    /// One summary per account, by account id.
    pub async fn summaries(&self) -> Vec<AccountSummary> {
        self.store()
            .read(|t| {
                t.accounts
                    .values()
                    .map(|account| AccountSummary {
                        account: account.id,
                        email: account.email.clone(),
                        balance: account.balance,
                        active_investments: t
                            .investments
                            .values()
                            .filter(|i| {
                                i.account == account.id && i.status == InvestmentStatus::Active
                            })
                            .count(),
                        unread_notifications: t
                            .notifications
                            .values()
                            .filter(|n| n.account == account.id && !n.read)
                            .count(),
                    })
                    .collect()
            })
            .await
    }

    /// Transactions of `account`, newest first.
    pub async fn transactions(
        &self,
        account: AccountId,
        query: TransactionQuery,
    ) -> TransactionPage {
        let page = query.page.max(1);
        let limit = query.limit.max(1);
        self.store()
            .read(|t| {
                let matching: Vec<&Transaction> = t
                    .transactions
                    .values()
                    .rev()
                    .filter(|tx| tx.account == account)
                    .filter(|tx| query.kind.is_none_or(|kind| tx.kind == kind))
                    .collect();
                let count = matching.len();
                TransactionPage {
                    transactions: matching
                        .into_iter()
                        .skip((page - 1) * limit)
                        .take(limit)
                        .cloned()
                        .collect(),
                    count,
                    page,
                    limit,
                    total_pages: count.div_ceil(limit).max(1),
                }
            })
            .await
    }

    /// Loans of `account`, newest first.
    pub async fn loans(&self, account: AccountId) -> Vec<Loan> {
        self.store()
            .read(|t| {
                t.loans
                    .values()
                    .rev()
                    .filter(|l| l.account == account)
                    .cloned()
                    .collect()
            })
            .await
    }

    pub async fn investments(&self, account: AccountId) -> Vec<Investment> {
        self.store()
            .read(|t| {
                t.investments
                    .values()
                    .filter(|i| i.account == account)
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Deposits and withdrawals awaiting an admin decision, oldest first.
    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.store()
            .read(|t| {
                t.transactions
                    .values()
                    .filter(|tx| tx.status == Status::Pending)
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Loans awaiting an admin decision, oldest first.
    pub async fn pending_loans(&self) -> Vec<Loan> {
        self.store()
            .read(|t| {
                t.loans
                    .values()
                    .filter(|l| l.status == Status::Pending)
                    .cloned()
                    .collect()
            })
            .await
    }

    /// Notifications of `account`, newest first.
    pub async fn notifications(&self, account: AccountId) -> Vec<Notification> {
        self.store()
            .read(|t| {
                t.notifications
                    .values()
                    .rev()
                    .filter(|n| n.account == account)
                    .cloned()
                    .collect()
            })
            .await
    }

    pub async fn mark_read(
        &self,
        account: AccountId,
        id: NotificationId,
    ) -> Result<(), NotificationError> {
        self.store()
            .atomically(|work| {
                let read = match work.notification(id) {
                    Some(n) if n.account == account => n.read,
                    _ => return Err(NotificationError::NotFound(id, account)),
                };
                if !read {
                    if let Some(n) = work.notification_mut(id) {
                        n.read = true;
                    }
                }
                Ok(())
            })
            .await
    }

    /// Mark every unread notification of `account` as read. Returns how many flipped.
    pub async fn mark_all_read(&self, account: AccountId) -> Result<usize, NotificationError> {
        self.store()
            .atomically(|work| {
                let unread = work.unread_notifications(account);
                for id in &unread {
                    if let Some(n) = work.notification_mut(*id) {
                        n.read = true;
                    }
                }
                Ok(unread.len())
            })
            .await
    }
}

/// Private API
impl Engine {
    fn outbox(&self) -> &Outbox {
        &self.inner.outbox
    }

    /// Create a pending deposit or withdrawal:
    /// - Ensure the amount is positive
    /// - Ensure the account exists (and, for withdrawals, currently covers the amount)
    /// - Insert the pending transaction, no balance effect
    async fn file_transaction(
        &self,
        account: AccountId,
        kind: TransactionType,
        amount: Amount,
        evidence: Option<EvidenceRef>,
    ) -> Result<TxId, RequestError> {
        ensure_positive(amount)?;
        let now = self.now();
        let id = self
            .store()
            .atomically(|work| {
                let balance = work
                    .account(account)
                    .ok_or(RequestError::AccountNotFound(account))?
                    .balance;
                if kind == TransactionType::Withdrawal && balance < amount {
                    return Err(RequestError::InsufficientFunds(account, balance, amount));
                }
                Ok(work.insert_transaction(|id| Transaction {
                    id,
                    account,
                    kind,
                    amount,
                    status: Status::Pending,
                    evidence,
                    created_at: now,
                    updated_at: now,
                }))
            })
            .await?;
        info!(account, tx = id, amount = %amount, "{kind} requested");
        Ok(id)
    }
}

fn ensure_positive(amount: Amount) -> Result<(), RequestError> {
    if amount.is_positive() {
        Ok(())
    } else {
        Err(RequestError::NonPositiveAmount(amount))
    }
}
