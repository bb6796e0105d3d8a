//! CSV input: chart-of-accounts export files.
//!
//! Column layout (header row skipped): 0 = code, 1 = name, 2 = type,
//! 4 = description. Column 3 (tax code) and anything after 4 is ignored.

use crate::error::{Error, Result};
use crate::model::Record;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const CODE_COL: usize = 0;
const NAME_COL: usize = 1;
const TYPE_COL: usize = 2;
const DESCRIPTION_COL: usize = 4;

/// Read every record from one file, in file order.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        if row.len() <= DESCRIPTION_COL {
            let line = row.position().map(|p| p.line()).unwrap_or_default();
            return Err(Error::Config(format!(
                "{}:{line}: expected at least {} columns, found {}",
                path.display(),
                DESCRIPTION_COL + 1,
                row.len()
            )));
        }

        let description = row[DESCRIPTION_COL].trim();
        records.push(Record {
            code: row[CODE_COL].trim().to_string(),
            name: row[NAME_COL].trim().to_string(),
            account_type: row[TYPE_COL].trim().to_uppercase(),
            description: (!description.is_empty()).then(|| description.to_string()),
        });
    }
    Ok(records)
}

/// Concatenate records from several files.
///
/// A file that cannot be read is logged and skipped; the rest still load.
pub fn load_all(paths: &[PathBuf]) -> Vec<Record> {
    let mut all = Vec::new();
    for path in paths {
        match read_records(path) {
            Ok(records) => {
                info!(file = %path.display(), records = records.len(), "loaded accounts");
                all.extend(records);
            }
            Err(e) => warn!(file = %path.display(), error = %e, "skipping unreadable file"),
        }
    }
    all
}
