//! Runtime configuration, read from `LEDGER_*` environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

const JOURNAL: &str = "LEDGER_JOURNAL";
const PLANS: &str = "LEDGER_PLANS";
const SETTLEMENT_INTERVAL_SECS: &str = "LEDGER_SETTLEMENT_INTERVAL_SECS";
const SERVE: &str = "LEDGER_SERVE";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: expected a positive number of seconds, got '{value}'")]
    Interval { var: &'static str, value: String },
    #[error("{var}: expected true or false, got '{value}'")]
    Flag { var: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Commit journal. `None` keeps the ledger in memory only.
    pub journal: Option<PathBuf>,
    /// CSV plan catalog. `None` uses the built-in tiers.
    pub plans: Option<PathBuf>,
    pub settlement_interval: Duration,
    /// Keep running the settlement scheduler after the command file is consumed.
    pub serve: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            journal: None,
            plans: None,
            settlement_interval: Duration::from_secs(3600),
            serve: false,
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| env::var(name).ok())
    }

    /// Build from a variable lookup. Unset and empty variables keep their defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let defaults = LedgerConfig::default();

        let settlement_interval = match var(SETTLEMENT_INTERVAL_SECS) {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or(ConfigError::Interval {
                    var: SETTLEMENT_INTERVAL_SECS,
                    value,
                })?,
            None => defaults.settlement_interval,
        };
        let serve = match var(SERVE) {
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(ConfigError::Flag { var: SERVE, value }),
            },
            None => defaults.serve,
        };

        Ok(LedgerConfig {
            journal: var(JOURNAL).map(PathBuf::from),
            plans: var(PLANS).map(PathBuf::from),
            settlement_interval,
            serve,
        })
    }
}
