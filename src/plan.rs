//! Investment plan catalog.
//!
//! The catalog is injected into the engine and can be replaced at runtime.
//! Already purchased investments keep the terms they were bought with.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::Amount;

/// Longest term a plan may run for.
pub const MAX_DURATION_DAYS: u32 = 36_500;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("plan {plan} minimum must be positive, got {min}")]
    NonPositiveMin { plan: String, min: Amount },

    #[error("plan {plan} maximum {max} is below its minimum {min}")]
    MaxBelowMin {
        plan: String,
        min: Amount,
        max: Amount,
    },

    #[error(
        "plan {plan} duration must be between 1 and {max} days, got {days}",
        max = MAX_DURATION_DAYS
    )]
    Duration { plan: String, days: u32 },

    #[error("plan {plan} is listed more than once")]
    Duplicate { plan: String },
}

/// Terms of one plan tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub name: String,
    pub min: Amount,
    /// `None` means unbounded.
    pub max: Option<Amount>,
    pub duration_days: u32,
    pub roi_percent: u32,
}

impl Plan {
    pub fn new(
        name: impl Into<String>,
        min: Amount,
        max: Option<Amount>,
        duration_days: u32,
        roi_percent: u32,
    ) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            duration_days,
            roi_percent,
        }
    }

    /// Check the terms are usable for purchases.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.min <= Amount::ZERO {
            return Err(PlanError::NonPositiveMin {
                plan: self.name.clone(),
                min: self.min,
            });
        }
        if let Some(max) = self.max.filter(|max| *max < self.min) {
            return Err(PlanError::MaxBelowMin {
                plan: self.name.clone(),
                min: self.min,
                max,
            });
        }
        if !(1..=MAX_DURATION_DAYS).contains(&self.duration_days) {
            return Err(PlanError::Duration {
                plan: self.name.clone(),
                days: self.duration_days,
            });
        }
        Ok(())
    }

    /// Inclusive on both ends.
    pub fn accepts(&self, amount: Amount) -> bool {
        amount >= self.min && self.max.is_none_or(|max| amount <= max)
    }

    /// `amount + amount * roi / 100`
    pub fn returns_for(&self, amount: Amount) -> Option<Amount> {
        amount.checked_add(amount.percent(self.roi_percent)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    version: u32,
    plans: BTreeMap<String, Plan>,
}

impl PlanCatalog {
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            version: 1,
            plans: plans.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn get(&self, name: &str) -> Option<&Plan> {
        self.plans.get(name)
    }

    pub fn plans(&self) -> impl Iterator<Item = &Plan> + '_ {
        self.plans.values()
    }

    /// Produce the catalog that follows `self`, carrying a higher version.
    pub fn succeeded_by(&self, next: PlanCatalog) -> PlanCatalog {
        PlanCatalog {
            version: self.version + 1,
            plans: next.plans,
        }
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        let units = Amount::from_units;
        Self::new([
            Plan::new("Starter", units(200), Some(units(999)), 7, 10),
            Plan::new("Standard", units(1_000), Some(units(4_999)), 14, 20),
            Plan::new("Premium", units(5_000), Some(units(9_999)), 21, 30),
            Plan::new("Elite", units(10_000), Some(units(49_999)), 30, 45),
            Plan::new("Retirement", units(50_000), None, 45, 60),
        ])
    }
}
