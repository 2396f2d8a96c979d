use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

use crate::records::{RawCashRow, RawCorporateActionRow, RawPositionRow, RawTradeRow};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Read all well-formed rows of a CSV export.
///
/// Rows that fail to deserialize are skipped with a warning carrying the
/// line number; only opening the file can fail.
fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for (idx, result) in reader.deserialize::<T>().enumerate() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                // +2: one for the header line, one for 1-based numbering
                warn!(
                    file = %path.display(),
                    line = idx + 2,
                    "skipping malformed row: {e}"
                );
            }
        }
    }
    Ok(rows)
}

pub fn read_trades(path: &Path) -> Result<Vec<RawTradeRow>, ImportError> {
    read_rows(path)
}

pub fn read_cash(path: &Path) -> Result<Vec<RawCashRow>, ImportError> {
    read_rows(path)
}

pub fn read_corporate_actions(path: &Path) -> Result<Vec<RawCorporateActionRow>, ImportError> {
    read_rows(path)
}

pub fn read_positions(path: &Path) -> Result<Vec<RawPositionRow>, ImportError> {
    read_rows(path)
}
