//! Maturity settlement.
//!
//! Each matured investment is settled in its own unit: credit the frozen
//! returns, complete the investment, record a `roi` transaction and notify the
//! owner. The unit re-checks the investment status, so overlapping or repeated
//! ticks credit every investment at most once.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{Engine, SettlementAnomaly, SettlementError};
use crate::model::{InvestmentId, InvestmentStatus, Status, Transaction, TransactionType};
use crate::store::{StorageError, UnitOfWork};

/// Outcome of one settlement tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub settled: Vec<InvestmentId>,
    pub skipped: Vec<(InvestmentId, SettlementAnomaly)>,
}

enum RowError {
    Anomaly(SettlementAnomaly),
    Storage(StorageError),
}

impl From<StorageError> for RowError {
    fn from(e: StorageError) -> Self {
        RowError::Storage(e)
    }
}

impl From<SettlementAnomaly> for RowError {
    fn from(e: SettlementAnomaly) -> Self {
        RowError::Anomaly(e)
    }
}

impl Engine {
    /// Settle every investment matured as of the engine clock.
    pub async fn settle_matured(&self) -> Result<SettlementReport, SettlementError> {
        self.settle_matured_at(self.now()).await
    }

    /// Settle every investment with `maturity_date <= now` that is still active.
    ///
    /// Anomalous rows are reported and skipped. A storage failure stops the
    /// tick; rows settled before it stay settled.
    pub async fn settle_matured_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<SettlementReport, SettlementError> {
        let due: Vec<InvestmentId> = self
            .store()
            .read(|t| {
                t.investments
                    .values()
                    .filter(|i| i.is_matured(now))
                    .map(|i| i.id)
                    .collect()
            })
            .await;

        let mut report = SettlementReport::default();
        for id in due {
            let result = self
                .store()
                .atomically(|work| settle_unit(work, id, now))
                .await;
            match result {
                Ok(true) => report.settled.push(id),
                // settled by a concurrent tick
                Ok(false) => {}
                Err(RowError::Anomaly(anomaly)) => {
                    warn!(investment = id, reason = %anomaly, "settlement skipped");
                    report.skipped.push((id, anomaly));
                }
                Err(RowError::Storage(e)) => {
                    warn!(investment = id, reason = %e, "settlement aborted");
                    return Err(e.into());
                }
            }
        }

        if !report.settled.is_empty() || !report.skipped.is_empty() {
            info!(
                settled = report.settled.len(),
                skipped = report.skipped.len(),
                "settlement tick finished"
            );
        }
        Ok(report)
    }
}

/// Settle one investment. `Ok(false)` when it is no longer due.
fn settle_unit(
    work: &mut UnitOfWork<'_>,
    id: InvestmentId,
    now: DateTime<Utc>,
) -> Result<bool, RowError> {
    let Some(investment) = work.investment(id).filter(|i| i.is_matured(now)) else {
        return Ok(false);
    };
    let (owner, amount, returns) = (investment.account, investment.amount, investment.returns);
    if !returns.is_positive() {
        return Err(SettlementAnomaly::InvalidReturns(returns).into());
    }

    let account = work
        .account_mut(owner)
        .ok_or(SettlementAnomaly::AccountNotFound(owner))?;
    account.balance = account
        .balance
        .checked_add(returns)
        .ok_or(SettlementAnomaly::Overflow(owner))?;

    if let Some(investment) = work.investment_mut(id) {
        investment.status = InvestmentStatus::Completed;
    }
    work.insert_transaction(|tx| Transaction {
        id: tx,
        account: owner,
        kind: TransactionType::Roi,
        amount: returns,
        status: Status::Approved,
        evidence: None,
        created_at: now,
        updated_at: now,
    });
    work.notify(
        owner,
        format!(
            "Your investment of ${amount} has matured. \
             Your account has been credited with ${returns}."
        ),
        now,
    );
    info!(account = owner, investment = id, returns = %returns, "investment settled");
    Ok(true)
}
