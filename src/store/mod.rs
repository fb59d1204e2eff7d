//! Ledger storage.
//!
//! All tables live behind a single async mutex, so every atomic unit is a
//! single-writer transaction: balance mutations on one account can never
//! interleave. Changes are staged in a [`UnitOfWork`] over a read-only view of
//! the tables and only become visible when the unit commits, which includes
//! the journal append when one is attached. A unit that returns an error, or
//! whose journal append fails, leaves nothing behind.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;

use crate::model::{
    Account, AccountId, Investment, InvestmentId, Loan, LoanId, Notification, NotificationId,
    Transaction, TxId,
};

mod error;
pub use error::StorageError;

pub mod journal;
pub use journal::{CsvJournal, Journal, JournalFile};

/// Every persisted record, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tables {
    pub accounts: BTreeMap<AccountId, Account>,
    pub transactions: BTreeMap<TxId, Transaction>,
    pub loans: BTreeMap<LoanId, Loan>,
    pub investments: BTreeMap<InvestmentId, Investment>,
    pub notifications: BTreeMap<NotificationId, Notification>,
}

impl Tables {
    fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.transactions.is_empty()
            && self.loans.is_empty()
            && self.investments.is_empty()
            && self.notifications.is_empty()
    }

    /// Overwrite rows with the ones in `unit`.
    fn merge(&mut self, unit: Tables) {
        self.accounts.extend(unit.accounts);
        self.transactions.extend(unit.transactions);
        self.loans.extend(unit.loans);
        self.investments.extend(unit.investments);
        self.notifications.extend(unit.notifications);
    }
}

struct State {
    tables: Tables,
    journal: Option<Box<dyn Journal>>,
    /// Last sequence number handed to the journal, committed or not.
    sequence: u64,
}

impl State {
    fn commit(&mut self, unit: Tables) -> Result<(), StorageError> {
        if unit.is_empty() {
            return Ok(());
        }

        // a failed append burns its sequence number so its partial rows are never replayed
        self.sequence += 1;
        if let Some(journal) = self.journal.as_mut() {
            journal.append(self.sequence, &unit)?;
        }
        debug!(sequence = self.sequence, "unit committed");
        self.tables.merge(unit);
        Ok(())
    }
}

/// The persistent store shared by request handlers and the settlement scheduler.
pub struct Store {
    state: Mutex<State>,
}

impl Store {
    /// A store without durability, for tests and dry runs.
    pub fn in_memory() -> Self {
        Self::from_parts(Tables::default(), None, 0)
    }

    /// An empty store recording commits into `journal`.
    pub fn with_journal(journal: impl Journal + 'static) -> Self {
        Self::from_parts(Tables::default(), Some(Box::new(journal)), 0)
    }

    /// Open (or create) a journal file and rebuild the tables it records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let (journal, tables, sequence) = CsvJournal::open(path)?;
        Ok(Self::from_parts(tables, Some(Box::new(journal)), sequence))
    }

    fn from_parts(tables: Tables, journal: Option<Box<dyn Journal>>, sequence: u64) -> Self {
        Self {
            state: Mutex::new(State {
                tables,
                journal,
                sequence,
            }),
        }
    }

    /// Run `unit` as one atomic unit.
    ///
    /// The closure sees its own staged writes. If it returns `Err`, or the
    /// commit fails, none of its writes are applied.
    pub async fn atomically<T, E, F>(&self, unit: F) -> Result<T, E>
    where
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut state = self.state.lock().await;
        let (value, staged) = {
            let mut work = UnitOfWork::new(&state.tables);
            let value = unit(&mut work)?;
            (value, work.staged)
        };
        state.commit(staged)?;
        Ok(value)
    }

    /// Read a consistent snapshot of the committed tables.
    pub async fn read<T>(&self, query: impl FnOnce(&Tables) -> T) -> T {
        let state = self.state.lock().await;
        query(&state.tables)
    }
}

/// Staged writes of one atomic unit.
pub struct UnitOfWork<'a> {
    base: &'a Tables,
    staged: Tables,
}

fn lookup<'t, V>(
    staged: &'t BTreeMap<u64, V>,
    base: &'t BTreeMap<u64, V>,
    id: u64,
) -> Option<&'t V> {
    staged.get(&id).or_else(|| base.get(&id))
}

/// Copy-on-write access to a committed row.
fn lookup_mut<'t, V: Clone>(
    staged: &'t mut BTreeMap<u64, V>,
    base: &BTreeMap<u64, V>,
    id: u64,
) -> Option<&'t mut V> {
    if !staged.contains_key(&id) {
        let row = base.get(&id)?.clone();
        staged.insert(id, row);
    }
    staged.get_mut(&id)
}

fn insert<V>(
    staged: &mut BTreeMap<u64, V>,
    base: &BTreeMap<u64, V>,
    build: impl FnOnce(u64) -> V,
) -> u64 {
    let last = |table: &BTreeMap<u64, V>| table.keys().next_back().copied().unwrap_or(0);
    let id = last(staged).max(last(base)) + 1;
    staged.insert(id, build(id));
    id
}

impl<'a> UnitOfWork<'a> {
    fn new(base: &'a Tables) -> Self {
        Self {
            base,
            staged: Tables::default(),
        }
    }

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        lookup(&self.staged.accounts, &self.base.accounts, id)
    }

    pub fn account_mut(&mut self, id: AccountId) -> Option<&mut Account> {
        lookup_mut(&mut self.staged.accounts, &self.base.accounts, id)
    }

    pub fn insert_account(&mut self, build: impl FnOnce(AccountId) -> Account) -> AccountId {
        insert(&mut self.staged.accounts, &self.base.accounts, build)
    }

    pub fn transaction(&self, id: TxId) -> Option<&Transaction> {
        lookup(&self.staged.transactions, &self.base.transactions, id)
    }

    pub fn transaction_mut(&mut self, id: TxId) -> Option<&mut Transaction> {
        lookup_mut(&mut self.staged.transactions, &self.base.transactions, id)
    }

    pub fn insert_transaction(&mut self, build: impl FnOnce(TxId) -> Transaction) -> TxId {
        insert(&mut self.staged.transactions, &self.base.transactions, build)
    }

    pub fn loan(&self, id: LoanId) -> Option<&Loan> {
        lookup(&self.staged.loans, &self.base.loans, id)
    }

    pub fn loan_mut(&mut self, id: LoanId) -> Option<&mut Loan> {
        lookup_mut(&mut self.staged.loans, &self.base.loans, id)
    }

    pub fn insert_loan(&mut self, build: impl FnOnce(LoanId) -> Loan) -> LoanId {
        insert(&mut self.staged.loans, &self.base.loans, build)
    }

    pub fn investment(&self, id: InvestmentId) -> Option<&Investment> {
        lookup(&self.staged.investments, &self.base.investments, id)
    }

    pub fn investment_mut(&mut self, id: InvestmentId) -> Option<&mut Investment> {
        lookup_mut(&mut self.staged.investments, &self.base.investments, id)
    }

    pub fn insert_investment(
        &mut self,
        build: impl FnOnce(InvestmentId) -> Investment,
    ) -> InvestmentId {
        insert(&mut self.staged.investments, &self.base.investments, build)
    }

    pub fn notification(&self, id: NotificationId) -> Option<&Notification> {
        lookup(&self.staged.notifications, &self.base.notifications, id)
    }

    pub fn notification_mut(&mut self, id: NotificationId) -> Option<&mut Notification> {
        lookup_mut(&mut self.staged.notifications, &self.base.notifications, id)
    }

    /// Append a notification for `account`.
    pub fn notify(
        &mut self,
        account: AccountId,
        message: String,
        now: DateTime<Utc>,
    ) -> NotificationId {
        insert(
            &mut self.staged.notifications,
            &self.base.notifications,
            |id| Notification {
                id,
                account,
                message,
                read: false,
                created_at: now,
            },
        )
    }

    /// Ids of every unread notification owned by `account`.
    pub fn unread_notifications(&self, account: AccountId) -> Vec<NotificationId> {
        let mut ids: Vec<_> = self
            .base
            .notifications
            .keys()
            .chain(self.staged.notifications.keys())
            .copied()
            .filter(|id| {
                lookup(&self.staged.notifications, &self.base.notifications, *id)
                    .is_some_and(|n| n.account == account && !n.read)
            })
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }
}
