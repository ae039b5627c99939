//! Bulk import of expenses from header-less CSV.
//!
//! Each line is `date,amount,description,category`. Lines that fail validation
//! or repeat an existing expense are skipped and logged; they never abort the
//! import. The whole pass runs in one transaction, so a storage or stream
//! failure leaves the store exactly as it was. Quotes carry no meaning: every
//! physical line is one record, split on commas.

use std::collections::HashSet;
use std::io::Read;

use chrono::{Local, NaiveDate};
use csv::{ReaderBuilder, StringRecord};
use log::{error, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;

use crate::db;
use crate::error::{AppError, Result};
use crate::models::{is_known_category, Expense, ExpenseMatch};
use crate::money::parse_amount_to_cents;

const FIELD_COUNT: usize = 4;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub skipped: usize,
}

/// Why a single line was left out of the import.
#[derive(Debug, Error, PartialEq)]
pub enum RowRejection {
    #[error("expected 4 fields, found {0}")]
    FieldCount(usize),

    #[error("description is empty")]
    EmptyDescription,

    #[error("unknown category {0:?}")]
    UnknownCategory(String),

    #[error("invalid date {0:?}")]
    InvalidDate(String),

    #[error("invalid amount {0:?}")]
    InvalidAmount(String),

    #[error("amount must be greater than zero")]
    NonPositiveAmount,

    #[error("date {0} is in the future")]
    FutureDate(NaiveDate),

    #[error("line is not valid UTF-8")]
    Encoding,

    #[error("expense already recorded")]
    Duplicate,
}

pub fn import_csv<R: Read>(conn: &mut Connection, user_id: i64, input: R) -> Result<ImportSummary> {
    let tx = conn.transaction()?;
    match reconcile_rows(&tx, user_id, input) {
        Ok(summary) => {
            tx.commit()?;
            info!(
                "CSV import for user {user_id}: {} imported, {} skipped",
                summary.imported, summary.skipped
            );
            Ok(summary)
        }
        Err(err) => {
            error!("CSV import for user {user_id} failed, rolling back: {err}");
            if let Err(rollback_err) = tx.rollback() {
                error!("rollback of CSV import for user {user_id} failed: {rollback_err}");
            }
            Err(err)
        }
    }
}

fn reconcile_rows<R: Read>(conn: &Connection, user_id: i64, input: R) -> Result<ImportSummary> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(input);
    let today = Local::now().date_naive();
    let mut accepted: HashSet<ExpenseMatch> = HashSet::new();
    let mut summary = ImportSummary::default();
    let mut record = StringRecord::new();

    loop {
        match reader.read_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                if let csv::ErrorKind::Utf8 { pos, .. } = err.kind() {
                    let line = pos.as_ref().map(|p| p.line()).unwrap_or_default();
                    warn!("skipping CSV line {line}: {}", RowRejection::Encoding);
                    summary.skipped += 1;
                    continue;
                }
                return Err(AppError::Csv(err));
            }
        }

        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let outcome = parse_row(&record, user_id, today).and_then(|expense| {
            let key = ExpenseMatch::from(&expense);
            if accepted.contains(&key) {
                return Err(RowRejection::Duplicate);
            }
            Ok((expense, key))
        });

        let (expense, key) = match outcome {
            Ok(parsed) => parsed,
            Err(reason) => {
                skip(&mut summary, line, &record, &reason);
                continue;
            }
        };

        if !db::find_expenses_matching(conn, &key, 1)?.is_empty() {
            skip(&mut summary, line, &record, &RowRejection::Duplicate);
            continue;
        }

        db::insert_expense(conn, &expense)?;
        accepted.insert(key);
        summary.imported += 1;
    }

    Ok(summary)
}

fn skip(summary: &mut ImportSummary, line: u64, record: &StringRecord, reason: &RowRejection) {
    let raw = record.iter().collect::<Vec<_>>().join(",");
    warn!("skipping CSV line {line} ({reason}): {raw}");
    summary.skipped += 1;
}

/// Validates one record and turns it into an unsaved expense.
pub fn parse_row(
    record: &StringRecord,
    user_id: i64,
    today: NaiveDate,
) -> std::result::Result<Expense, RowRejection> {
    if record.len() != FIELD_COUNT {
        return Err(RowRejection::FieldCount(record.len()));
    }
    let date_raw = &record[0];
    let amount_raw = &record[1];
    let description = record[2].trim().to_string();
    let category = record[3].trim().to_lowercase();

    if description.is_empty() {
        return Err(RowRejection::EmptyDescription);
    }
    if !is_known_category(&category) {
        return Err(RowRejection::UnknownCategory(category));
    }

    let date = NaiveDate::parse_from_str(date_raw.trim(), "%Y-%m-%d")
        .map_err(|_| RowRejection::InvalidDate(date_raw.to_string()))?;
    let amount_cents =
        parse_amount_to_cents(amount_raw).ok_or_else(|| RowRejection::InvalidAmount(amount_raw.to_string()))?;
    if amount_cents <= 0 {
        return Err(RowRejection::NonPositiveAmount);
    }
    if date > today {
        return Err(RowRejection::FutureDate(date));
    }

    Ok(Expense {
        id: None,
        user_id,
        date,
        category,
        amount_cents,
        description,
    })
}
