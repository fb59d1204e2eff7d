use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::amount::AmountError;
use crate::engine::AccountSummary;
use crate::model::{AccountId, Command, Decision, EvidenceRef, InstrumentKind};
use crate::plan::{Plan, PlanCatalog, PlanError};

/// Errors that can occur when reading or writing csv rows
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized command type '{command}'")]
    UnrecognizedType { line: usize, command: String },

    #[error("line {line}: {command} missing {field}")]
    MissingField {
        line: usize,
        command: String,
        field: &'static str,
    },

    #[error("line {line}: {source}")]
    InvalidAmount { line: usize, source: AmountError },

    #[error("line {line}: '{value}' is not an RFC 3339 time")]
    InvalidTime { line: usize, value: String },

    #[error("line {line}: unrecognized instrument '{kind}'")]
    UnrecognizedInstrument { line: usize, kind: String },

    #[error("line {line}: {source}")]
    InvalidPlan { line: usize, source: PlanError },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to write csv: {0}")]
    Io(#[from] io::Error),
}

/// One command row: `type,account,ref,amount,detail`.
///
/// `ref` names the resolved transaction or loan, `detail` carries the email,
/// evidence, loan reason, plan name, instrument kind or settlement time.
#[derive(Debug, Deserialize)]
struct CommandRow {
    r#type: String,
    account: Option<AccountId>,
    r#ref: Option<u64>,
    amount: Option<String>,
    detail: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlanRow {
    name: String,
    min: String,
    max: Option<String>,
    duration_days: u32,
    roi_percent: u32,
}

#[derive(Debug, Serialize)]
struct OutputRow {
    account: AccountId,
    email: String,
    balance: String,
    active_investments: usize,
    unread_notifications: usize,
}

/// Read commands from a csv file
///
/// The returned iterator owns the open file and does not borrow `path`.
pub fn read_commands(
    path: &Path,
) -> Result<impl Iterator<Item = Result<Command, CsvError>> + use<>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    Ok(reader
        .into_deserialize::<CommandRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            parse_command(line, row)
        }))
}

fn parse_command(line: usize, row: CommandRow) -> Result<Command, CsvError> {
    let missing = |field| CsvError::MissingField {
        line,
        command: row.r#type.clone(),
        field,
    };
    let account = || row.account.ok_or_else(|| missing("account"));
    let amount = || {
        let raw = row.amount.as_deref().ok_or_else(|| missing("amount"))?;
        raw.parse::<Amount>()
            .map_err(|source| CsvError::InvalidAmount { line, source })
    };
    let detail = |field| row.detail.clone().ok_or_else(|| missing(field));

    match row.r#type.as_str() {
        "open" => Ok(Command::Open {
            email: detail("email")?,
        }),
        "deposit" => Ok(Command::RequestDeposit {
            account: account()?,
            amount: amount()?,
            evidence: row.detail.clone().map(EvidenceRef),
        }),
        "withdrawal" => Ok(Command::RequestWithdrawal {
            account: account()?,
            amount: amount()?,
        }),
        "loan" => Ok(Command::RequestLoan {
            account: account()?,
            amount: amount()?,
            reason: detail("reason")?,
        }),
        "approve" | "decline" => {
            let decision = if row.r#type == "approve" {
                Decision::Approve
            } else {
                Decision::Decline
            };
            let kind = match detail("instrument")?.as_str() {
                "deposit" => InstrumentKind::Deposit,
                "withdrawal" => InstrumentKind::Withdrawal,
                "loan" => InstrumentKind::Loan,
                other => {
                    return Err(CsvError::UnrecognizedInstrument {
                        line,
                        kind: other.to_string(),
                    });
                }
            };
            Ok(Command::Resolve {
                id: row.r#ref.ok_or_else(|| missing("ref"))?,
                kind,
                decision,
            })
        }
        "purchase" => Ok(Command::Purchase {
            account: account()?,
            plan: detail("plan")?,
            amount: amount()?,
        }),
        "settle" => {
            let at = match row.detail.as_deref() {
                Some(value) => Some(
                    DateTime::parse_from_rfc3339(value)
                        .map_err(|_| CsvError::InvalidTime {
                            line,
                            value: value.to_string(),
                        })?
                        .with_timezone(&Utc),
                ),
                None => None,
            };
            Ok(Command::Settle { at })
        }
        "read_all" => Ok(Command::MarkAllRead {
            account: account()?,
        }),
        other => Err(CsvError::UnrecognizedType {
            line,
            command: other.to_string(),
        }),
    }
}

/// Read a plan catalog: `name,min,max,duration_days,roi_percent`, empty `max` for no upper bound.
///
/// Every plan must pass [`Plan::validate`] and names must be unique.
pub fn read_plans(path: impl AsRef<Path>) -> Result<PlanCatalog, CsvError> {
    let path = path.as_ref();
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })?;

    let mut plans: Vec<Plan> = Vec::new();
    for (idx, result) in reader.into_deserialize::<PlanRow>().enumerate() {
        let line = idx + 2;
        let row = result.map_err(|source| CsvError::Parse { line, source })?;
        let parse = |raw: &str| {
            raw.parse::<Amount>()
                .map_err(|source| CsvError::InvalidAmount { line, source })
        };
        let plan = Plan::new(
            row.name,
            parse(&row.min)?,
            row.max.as_deref().map(parse).transpose()?,
            row.duration_days,
            row.roi_percent,
        );
        plan.validate()
            .map_err(|source| CsvError::InvalidPlan { line, source })?;
        if plans.iter().any(|p| p.name == plan.name) {
            return Err(CsvError::InvalidPlan {
                line,
                source: PlanError::Duplicate { plan: plan.name },
            });
        }
        plans.push(plan);
    }
    Ok(PlanCatalog::new(plans))
}

/// Write account summaries in csv format
pub fn write_accounts(
    accounts: impl IntoIterator<Item = AccountSummary>,
    out: impl io::Write,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);

    for summary in accounts {
        let row = OutputRow {
            account: summary.account,
            email: summary.email,
            balance: summary.balance.to_string(),
            active_investments: summary.active_investments,
            unread_notifications: summary.unread_notifications,
        };
        writer.serialize(&row)?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn commands(content: &str) -> Vec<Result<Command, CsvError>> {
        let file = write_csv(content);
        read_commands(file.path()).unwrap().collect()
    }

    const HEADER: &str = "type,account,ref,amount,detail\n";

    #[test]
    fn read_deposit_with_evidence() {
        let results = commands(&format!("{HEADER}deposit,1,,10.5,proofs/1.png\n"));
        assert_eq!(results.len(), 1);

        match results.into_iter().next().unwrap().unwrap() {
            Command::RequestDeposit {
                account,
                amount,
                evidence,
            } => {
                assert_eq!(account, 1);
                assert_eq!(amount, "10.5".parse().unwrap());
                assert_eq!(evidence, Some(EvidenceRef("proofs/1.png".to_string())));
            }
            other => panic!("expected deposit, got {other:?}"),
        }
    }

    #[test]
    fn read_resolution() {
        let results = commands(&format!("{HEADER}decline,,7,,withdrawal\n"));
        assert!(matches!(
            results[0],
            Ok(Command::Resolve {
                id: 7,
                kind: InstrumentKind::Withdrawal,
                decision: Decision::Decline,
            })
        ));
    }

    #[test]
    fn read_settle_with_and_without_time() {
        let results = commands(&format!(
            "{HEADER}settle,,,,2026-01-08T00:00:00Z\nsettle,,,,\n"
        ));
        let expected = DateTime::parse_from_rfc3339("2026-01-08T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(matches!(results[0], Ok(Command::Settle { at: Some(at) }) if at == expected));
        assert!(matches!(results[1], Ok(Command::Settle { at: None })));
    }

    #[test]
    fn read_with_whitespace() {
        let results = commands("type, account, ref, amount, detail\npurchase, 1, , 200, Starter\n");
        assert!(matches!(
            &results[0],
            Ok(Command::Purchase { plan, .. }) if plan == "Starter"
        ));
    }

    #[test]
    fn read_returns_error_for_unknown_type() {
        let results = commands(&format!("{HEADER}refund,1,,10.0,\n"));
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::UnrecognizedType { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_missing_fields() {
        let results = commands(&format!("{HEADER}deposit,1,,,\nloan,1,,50,\n"));
        assert!(matches!(
            results[0],
            Err(CsvError::MissingField {
                line: 2,
                field: "amount",
                ..
            })
        ));
        assert!(matches!(
            results[1],
            Err(CsvError::MissingField {
                line: 3,
                field: "reason",
                ..
            })
        ));
    }

    #[test]
    fn read_returns_error_for_malformed_amount() {
        let results = commands(&format!("{HEADER}withdrawal,1,,12.34567,\n"));
        assert!(matches!(
            results[0],
            Err(CsvError::InvalidAmount {
                line: 2,
                source: AmountError::TooPrecise(_)
            })
        ));
    }

    #[test]
    fn read_missing_file_fails() {
        let result = read_commands(Path::new("/nonexistent/commands.csv"));
        assert!(matches!(result, Err(CsvError::Open { .. })));
    }

    #[test]
    fn commands_outlive_the_path() {
        let file = write_csv(&format!("{HEADER}open,,,,a@example.com\nopen,,,,b@example.com\n"));
        let commands = {
            let path = file.path().to_path_buf();
            read_commands(&path).unwrap()
        };

        let reader = std::thread::spawn(move || commands.filter(Result::is_ok).count());
        assert_eq!(reader.join().unwrap(), 2);
    }

    #[test]
    fn read_plan_catalog() {
        let file = write_csv(
            "name,min,max,duration_days,roi_percent\n\
             Bronze,100,499.99,5,8\n\
             Gold,500,,10,25\n",
        );
        let catalog = read_plans(file.path()).unwrap();

        let bronze = catalog.get("Bronze").unwrap();
        assert_eq!(bronze.max, Some("499.99".parse().unwrap()));
        assert_eq!(bronze.duration_days, 5);
        let gold = catalog.get("Gold").unwrap();
        assert_eq!(gold.max, None);
        assert_eq!(gold.roi_percent, 25);
    }

    fn plan_error(rows: &str) -> PlanError {
        let file = write_csv(&format!("name,min,max,duration_days,roi_percent\n{rows}"));
        match read_plans(file.path()) {
            Err(CsvError::InvalidPlan { source, .. }) => source,
            other => panic!("expected invalid plan, got {other:?}"),
        }
    }

    #[test]
    fn read_plans_rejects_unusable_terms() {
        assert!(matches!(
            plan_error("Inverted,500,100,7,10\n"),
            PlanError::MaxBelowMin { .. }
        ));
        assert!(matches!(
            plan_error("Free,0,,7,10\n"),
            PlanError::NonPositiveMin { .. }
        ));
        assert!(matches!(
            plan_error("Instant,10,,0,10\n"),
            PlanError::Duration { days: 0, .. }
        ));
        assert!(matches!(
            plan_error("Forever,10,,200000000,10\n"),
            PlanError::Duration { days: 200_000_000, .. }
        ));
    }

    #[test]
    fn read_plans_rejects_duplicate_names() {
        let file = write_csv(
            "name,min,max,duration_days,roi_percent\n\
             Gold,500,,10,25\n\
             Gold,100,,5,8\n",
        );
        assert!(matches!(
            read_plans(file.path()),
            Err(CsvError::InvalidPlan {
                line: 3,
                source: PlanError::Duplicate { .. }
            })
        ));
    }

    #[test]
    fn write_account_rows() {
        let mut out = Vec::new();
        write_accounts(
            [AccountSummary {
                account: 1,
                email: "a@example.com".to_string(),
                balance: Amount::from_units(1_020),
                active_investments: 0,
                unread_notifications: 3,
            }],
            &mut out,
        )
        .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "account,email,balance,active_investments,unread_notifications\n\
             1,a@example.com,1020.00,0,3\n"
        );
    }
}
