use std::io;
use thiserror::Error;

/// Failure to durably commit (or load) ledger state.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("journal i/o failed: {0}")]
    Io(#[from] io::Error),

    #[error("journal encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("journal record {line}: {reason}")]
    Corrupt { line: u64, reason: String },

    #[error("journal refuses appends after a failed unit could not be cut")]
    Poisoned,
}
