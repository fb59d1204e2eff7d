//! Append-only commit journal.
//!
//! Each committed unit is written as one CSV row per changed record
//! (`sequence,table,<record fields>`) followed by a `sequence,commit` marker.
//! Replay applies a unit only once its marker has been read, so rows of a unit
//! interrupted mid-write are ignored. A unit whose write or sync fails is cut
//! from the file before the next append.

use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::{error, info, warn};

use super::{StorageError, Tables};

const ACCOUNTS: &str = "account";
const TRANSACTIONS: &str = "transaction";
const LOANS: &str = "loan";
const INVESTMENTS: &str = "investment";
const NOTIFICATIONS: &str = "notification";
const COMMIT: &str = "commit";

/// Durable record of committed units.
pub trait Journal: Send {
    /// Record `unit` under `sequence`. Must not return `Ok` before the unit is
    /// durable, and must leave no trace of it when returning `Err`.
    fn append(&mut self, sequence: u64, unit: &Tables) -> Result<(), StorageError>;
}

/// The file a [`CsvJournal`] appends to.
pub trait JournalFile: Write + Send {
    fn sync(&mut self) -> io::Result<()>;
    /// Cut the file back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl JournalFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

pub struct CsvJournal<F = File> {
    file: F,
    /// File length right after the last durable unit.
    committed_len: u64,
    /// Set when a failed unit could not be cut from the file.
    poisoned: bool,
}

impl CsvJournal<File> {
    /// Open `path` for appending, returning the replayed tables and the highest
    /// sequence number found in the file. A trailing unit without its commit
    /// marker is cut from the file.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Tables, u64), StorageError> {
        let path = path.as_ref();
        let (tables, sequence, committed_len) = if path.exists() {
            replay(path)?
        } else {
            (Tables::default(), 0, 0)
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() > committed_len {
            warn!(path = %path.display(), "truncating uncommitted journal tail");
            file.set_len(committed_len)?;
        }

        info!(
            path = %path.display(),
            accounts = tables.accounts.len(),
            sequence,
            "journal opened"
        );
        Ok((Self::from_file(file, committed_len), tables, sequence))
    }
}

impl<F: JournalFile> CsvJournal<F> {
    /// Journal appending to `file`, whose first `committed_len` bytes hold committed units.
    pub fn from_file(file: F, committed_len: u64) -> Self {
        Self {
            file,
            committed_len,
            poisoned: false,
        }
    }

    fn write_durably(&mut self, bytes: &[u8]) -> Result<(), StorageError> {
        self.file.write_all(bytes)?;
        self.file.flush()?;
        self.file.sync()?;
        Ok(())
    }
}

fn write_rows<'r, T: Serialize + 'r>(
    writer: &mut csv::Writer<Vec<u8>>,
    sequence: u64,
    table: &str,
    rows: impl Iterator<Item = &'r T>,
) -> Result<(), StorageError> {
    for row in rows {
        writer.write_field(sequence.to_string())?;
        writer.write_field(table)?;
        writer.serialize(row)?;
    }
    Ok(())
}

/// Encode `unit` as its rows followed by the commit marker.
fn encode(sequence: u64, unit: &Tables) -> Result<Vec<u8>, StorageError> {
    let mut writer = WriterBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_writer(Vec::new());
    write_rows(&mut writer, sequence, ACCOUNTS, unit.accounts.values())?;
    write_rows(&mut writer, sequence, TRANSACTIONS, unit.transactions.values())?;
    write_rows(&mut writer, sequence, LOANS, unit.loans.values())?;
    write_rows(&mut writer, sequence, INVESTMENTS, unit.investments.values())?;
    write_rows(&mut writer, sequence, NOTIFICATIONS, unit.notifications.values())?;
    writer.write_record([sequence.to_string().as_str(), COMMIT])?;
    writer
        .into_inner()
        .map_err(|e| StorageError::Io(e.into_error()))
}

impl<F: JournalFile> Journal for CsvJournal<F> {
    fn append(&mut self, sequence: u64, unit: &Tables) -> Result<(), StorageError> {
        if self.poisoned {
            return Err(StorageError::Poisoned);
        }
        let bytes = encode(sequence, unit)?;

        if let Err(e) = self.write_durably(&bytes) {
            // whatever reached the file must not be replayed
            if let Err(cut) = self.file.truncate(self.committed_len) {
                error!(sequence, reason = %cut, "failed to cut journal back, refusing appends");
                self.poisoned = true;
            }
            return Err(e);
        }
        self.committed_len += bytes.len() as u64;
        Ok(())
    }
}

/// A unit read back from the journal, not yet closed by its marker.
#[derive(Default)]
struct OpenUnit {
    sequence: u64,
    rows: Tables,
    error: Option<StorageError>,
}

fn put<T: DeserializeOwned>(
    table: &mut BTreeMap<u64, T>,
    body: &StringRecord,
    line: u64,
    id: impl Fn(&T) -> u64,
) -> Result<(), StorageError> {
    let row: T = body.deserialize(None).map_err(|e| StorageError::Corrupt {
        line,
        reason: e.to_string(),
    })?;
    table.insert(id(&row), row);
    Ok(())
}

fn replay(path: &Path) -> Result<(Tables, u64, u64), StorageError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut tables = Tables::default();
    let mut open = OpenUnit::default();
    let mut highest = 0;
    let mut committed_len = 0;
    let mut record = StringRecord::new();
    let mut line = 0;

    while reader.read_record(&mut record)? {
        line += 1;
        let sequence = record
            .get(0)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| StorageError::Corrupt {
                line,
                reason: "missing sequence number".to_string(),
            })?;
        highest = highest.max(sequence);

        if sequence != open.sequence {
            if !open.rows.is_empty() {
                warn!(sequence = open.sequence, "discarding uncommitted journal unit");
            }
            open = OpenUnit {
                sequence,
                ..Default::default()
            };
        }

        let table = record.get(1).unwrap_or_default();
        if table == COMMIT {
            let unit = std::mem::take(&mut open);
            if let Some(error) = unit.error {
                return Err(error);
            }
            tables.merge(unit.rows);
            committed_len = reader.position().byte();
            continue;
        }
        if open.error.is_some() {
            continue;
        }

        let body: StringRecord = record.iter().skip(2).collect();
        let rows = &mut open.rows;
        let result = match table {
            ACCOUNTS => put(&mut rows.accounts, &body, line, |r| r.id),
            TRANSACTIONS => put(&mut rows.transactions, &body, line, |r| r.id),
            LOANS => put(&mut rows.loans, &body, line, |r| r.id),
            INVESTMENTS => put(&mut rows.investments, &body, line, |r| r.id),
            NOTIFICATIONS => put(&mut rows.notifications, &body, line, |r| r.id),
            other => Err(StorageError::Corrupt {
                line,
                reason: format!("unknown table '{other}'"),
            }),
        };
        // only fatal if the unit turns out to be committed
        if let Err(error) = result {
            open.error = Some(error);
        }
    }

    Ok((tables, highest, committed_len))
}
