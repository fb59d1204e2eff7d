use chrono::Duration;
use tracing::info;

use super::{Engine, PurchaseError};
use crate::Amount;
use crate::model::{
    AccountId, Investment, InvestmentStatus, Status, Transaction, TransactionType,
};

impl Engine {
    /// Buy `plan_name` for `amount`, debiting the account immediately.
    ///
    /// The plan terms and the computed returns are frozen on the investment.
    pub async fn purchase(
        &self,
        account: AccountId,
        plan_name: &str,
        amount: Amount,
    ) -> Result<Investment, PurchaseError> {
        let catalog = self.catalog().await;
        let plan = catalog
            .get(plan_name)
            .ok_or_else(|| PurchaseError::UnknownPlan(plan_name.to_string()))?;
        if !plan.accepts(amount) {
            return Err(PurchaseError::OutOfRange {
                plan: plan.name.clone(),
                min: plan.min,
                max: plan.max,
                requested: amount,
            });
        }
        let returns = plan
            .returns_for(amount)
            .ok_or(PurchaseError::Overflow(amount))?;

        let now = self.now();
        let maturity_date = Duration::try_days(i64::from(plan.duration_days))
            .and_then(|term| now.checked_add_signed(term))
            .ok_or_else(|| PurchaseError::MaturityOutOfRange {
                plan: plan.name.clone(),
                days: plan.duration_days,
            })?;
        let template = Investment {
            id: 0,
            account,
            plan_name: plan.name.clone(),
            catalog_version: catalog.version(),
            amount,
            duration_days: plan.duration_days,
            roi_percent: plan.roi_percent,
            returns,
            start_date: now,
            maturity_date,
            status: InvestmentStatus::Active,
        };

        let investment = self
            .store()
            .atomically(|work| {
                let holder = work
                    .account_mut(account)
                    .ok_or(PurchaseError::AccountNotFound(account))?;
                if holder.balance < amount {
                    return Err(PurchaseError::InsufficientFunds(
                        account,
                        holder.balance,
                        amount,
                    ));
                }
                holder.balance = holder.balance - amount;

                let id = work.insert_investment(|id| Investment {
                    id,
                    ..template.clone()
                });
                work.insert_transaction(|tx| Transaction {
                    id: tx,
                    account,
                    kind: TransactionType::Investment,
                    amount,
                    status: Status::Approved,
                    evidence: None,
                    created_at: now,
                    updated_at: now,
                });
                Ok(Investment { id, ..template })
            })
            .await;

        match &investment {
            Ok(i) => info!(
                account,
                investment = i.id,
                plan = %i.plan_name,
                amount = %amount,
                returns = %i.returns,
                "investment purchased"
            ),
            Err(e) => info!(account, plan = plan_name, reason = %e, "purchase skipped"),
        }
        investment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{engine, funded, units};
    use crate::plan::{Plan, PlanCatalog};

    fn amount(s: &str) -> Amount {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn starter_purchase_debits_and_freezes_terms() {
        let (engine, _rx) = engine();
        let account = funded(&engine, 1_000).await;

        let investment = engine
            .purchase(account, "Starter", units(200))
            .await
            .unwrap();

        assert_eq!(investment.returns, units(220));
        assert_eq!(investment.duration_days, 7);
        assert_eq!(investment.roi_percent, 10);
        assert_eq!(investment.catalog_version, 1);
        assert_eq!(investment.status, InvestmentStatus::Active);
        assert_eq!(
            investment.maturity_date - investment.start_date,
            Duration::days(7)
        );
        assert_eq!(engine.account(account).await.unwrap().balance, units(800));

        let audit = engine
            .transactions(account, Default::default())
            .await
            .transactions;
        assert_eq!(audit[0].kind, TransactionType::Investment);
        assert_eq!(audit[0].status, Status::Approved);
        assert_eq!(audit[0].amount, units(200));
    }

    #[tokio::test]
    async fn plan_bounds_are_inclusive() {
        let (engine, _rx) = engine();
        let account = funded(&engine, 10_000).await;

        for accepted in ["200", "999"] {
            engine
                .purchase(account, "Starter", amount(accepted))
                .await
                .unwrap();
        }
        for rejected in ["199.99", "999.01"] {
            let result = engine.purchase(account, "Starter", amount(rejected)).await;
            assert!(matches!(result, Err(PurchaseError::OutOfRange { .. })));
        }
        assert_eq!(
            engine.account(account).await.unwrap().balance,
            units(10_000 - 200 - 999)
        );
    }

    #[tokio::test]
    async fn out_of_range_message_names_bounds() {
        let (engine, _rx) = engine();
        let account = funded(&engine, 10).await;

        let err = engine
            .purchase(account, "Starter", units(100))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "investment amount must be between $200.00 and $999.00 for the Starter plan, got $100.00"
        );

        let err = engine
            .purchase(account, "Retirement", units(100))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("at least $50000.00"));
    }

    #[tokio::test]
    async fn unknown_plan_is_rejected() {
        let (engine, _rx) = engine();
        let account = funded(&engine, 1_000).await;

        let result = engine.purchase(account, "Platinum", units(500)).await;
        assert!(matches!(result, Err(PurchaseError::UnknownPlan(name)) if name == "Platinum"));
    }

    #[tokio::test]
    async fn insufficient_balance_leaves_no_trace() {
        let (engine, _rx) = engine();
        let account = funded(&engine, 300).await;

        let result = engine.purchase(account, "Starter", units(500)).await;
        assert!(matches!(
            result,
            Err(PurchaseError::InsufficientFunds(_, available, requested))
                if available == units(300) && requested == units(500)
        ));
        assert_eq!(engine.account(account).await.unwrap().balance, units(300));
        assert!(engine.investments(account).await.is_empty());
    }

    #[tokio::test]
    async fn unknown_account_is_rejected() {
        let (engine, _rx) = engine();
        let result = engine.purchase(9, "Starter", units(500)).await;
        assert!(matches!(result, Err(PurchaseError::AccountNotFound(9))));
    }

    #[tokio::test]
    async fn catalog_change_does_not_touch_existing_investments() {
        let (engine, _rx) = engine();
        let account = funded(&engine, 1_000).await;
        let before = engine
            .purchase(account, "Starter", units(200))
            .await
            .unwrap();

        engine
            .replace_catalog(PlanCatalog::new([Plan::new(
                "Starter",
                units(100),
                Some(units(999)),
                3,
                50,
            )]))
            .await;
        let after = engine
            .purchase(account, "Starter", units(200))
            .await
            .unwrap();

        let stored = engine.investments(account).await;
        assert_eq!(stored[0], before);
        assert_eq!(stored[0].returns, units(220));
        assert_eq!(after.returns, units(300));
        assert_eq!(after.catalog_version, 2);
    }

    #[tokio::test]
    async fn unrepresentable_maturity_is_rejected() {
        let (engine, _rx) = engine();
        let account = funded(&engine, 1_000).await;
        engine
            .replace_catalog(PlanCatalog::new([Plan::new(
                "Forever",
                units(1),
                None,
                200_000_000,
                5,
            )]))
            .await;

        let result = engine.purchase(account, "Forever", units(100)).await;

        assert!(matches!(
            result,
            Err(PurchaseError::MaturityOutOfRange {
                days: 200_000_000,
                ..
            })
        ));
        assert_eq!(engine.account(account).await.unwrap().balance, units(1_000));
        assert!(engine.investments(account).await.is_empty());
    }
}
