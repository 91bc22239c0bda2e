//! Batch CSV importer.
//!
//! Loads historical `timestamp,value` files into the readings table. Rows are
//! written in fixed-size batches, each committed in its own transaction, so a
//! failure mid-import leaves every earlier batch in place.

use crate::{
    core::{SensorKind, reading},
    entities::{Reading, reading as reading_entity},
    errors::{Error, Result},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use sea_orm::{DatabaseConnection, EntityTrait, TransactionTrait};
use serde::Deserialize;
use std::io;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

/// Rows per committed batch
pub const BATCH_SIZE: usize = 400;

/// Accepted timestamp layout; the fractional seconds are optional.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// What an import run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    /// Readings written to the store
    pub rows_written: usize,
    /// Transactions committed
    pub batches_committed: usize,
    /// Rows dropped because they did not parse
    pub rows_skipped: usize,
}

impl AddAssign for ImportSummary {
    fn add_assign(&mut self, other: Self) {
        self.rows_written += other.rows_written;
        self.batches_committed += other.batches_committed;
        self.rows_skipped += other.rows_skipped;
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    value: f64,
}

/// Parses a CSV timestamp, read as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::InvalidPayload {
            message: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn row_to_reading(
    collection: &str,
    kind: SensorKind,
    row: &CsvRow,
) -> Result<reading_entity::ActiveModel> {
    if !row.value.is_finite() {
        return Err(Error::InvalidPayload {
            message: format!("non-finite value {}", row.value),
        });
    }
    let timestamp = parse_timestamp(&row.timestamp)?;
    Ok(reading::new_reading(collection, kind, row.value, timestamp))
}

/// Reads every row of `path`, returning the parsed readings and the number of
/// rows skipped.
fn read_rows(
    path: &Path,
    collection: &str,
    kind: SensorKind,
) -> Result<(Vec<reading_entity::ActiveModel>, usize)> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut rows = Vec::new();
    let mut skipped = 0;

    for (index, record) in reader.deserialize::<CsvRow>().enumerate() {
        // header is line 1
        let line = index + 2;
        let parsed = record
            .map_err(Error::from)
            .and_then(|row| row_to_reading(collection, kind, &row));
        match parsed {
            Ok(model) => rows.push(model),
            Err(e) => {
                warn!("Skipping {}:{line}: {e}", path.display());
                skipped += 1;
            }
        }
    }
    Ok((rows, skipped))
}

/// Writes `rows` in batches of [`BATCH_SIZE`], one transaction per batch.
/// Returns `(rows_written, batches_committed)`.
pub async fn write_batches(
    db: &DatabaseConnection,
    mut rows: Vec<reading_entity::ActiveModel>,
) -> Result<(usize, usize)> {
    let mut written = 0;
    let mut batches = 0;

    while !rows.is_empty() {
        let rest = rows.split_off(rows.len().min(BATCH_SIZE));
        let batch = std::mem::replace(&mut rows, rest);
        let size = batch.len();

        let txn = db.begin().await?;
        Reading::insert_many(batch).exec(&txn).await?;
        txn.commit().await?;

        written += size;
        batches += 1;
        info!("Batch {batches} committed ({size} rows)");
    }
    Ok((written, batches))
}

/// Imports one CSV file as readings of `kind`. A missing file is logged and
/// yields an empty summary.
#[instrument(skip(db), fields(path = %path.display()))]
pub async fn import_file(
    db: &DatabaseConnection,
    collection: &str,
    kind: SensorKind,
    path: &Path,
) -> Result<ImportSummary> {
    let (rows, rows_skipped) = match read_rows(path, collection, kind) {
        Ok(parsed) => parsed,
        Err(Error::Csv(e)) if is_not_found(&e) => {
            warn!("File not found, skipping: {}", path.display());
            return Ok(ImportSummary::default());
        }
        Err(e) => return Err(e),
    };

    let (rows_written, batches_committed) = write_batches(db, rows).await?;
    info!(
        "Imported {rows_written} rows from {} ({rows_skipped} skipped)",
        path.display()
    );
    Ok(ImportSummary {
        rows_written,
        batches_committed,
        rows_skipped,
    })
}

/// Imports every file in order and sums the summaries.
pub async fn import_files(
    db: &DatabaseConnection,
    collection: &str,
    kind: SensorKind,
    paths: &[PathBuf],
) -> Result<ImportSummary> {
    let mut total = ImportSummary::default();
    for path in paths {
        total += import_file(db, collection, kind, path).await?;
    }
    Ok(total)
}

fn is_not_found(e: &csv::Error) -> bool {
    matches!(e.kind(), csv::ErrorKind::Io(err) if err.kind() == io::ErrorKind::NotFound)
}
