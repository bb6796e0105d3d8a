//! Synthetic chart-of-accounts files for load testing.

use crate::config::GenerateConfig;
use crate::error::Result;
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tracing::info;

pub const HEADER: [&str; 9] = [
    "*Code",
    "*Name",
    "*Type",
    "*Tax Code",
    "Description",
    "Dashboard",
    "Expense Claims",
    "Enable Payments",
    "Balance",
];

pub const ACCOUNT_TYPES: &[&str] = &[
    "Inventory",
    "Expense",
    "Fixed",
    "Revenue",
    "Current",
    "Currliab",
    "Depreciatn",
    "DirectCosts",
    "Equity",
    "Liability",
    "NonCurrent",
    "Otherincome",
    "Overheads",
    "Prepayment",
    "Sales",
    "Termliab",
];

pub const DESCRIPTIONS: &[&str] = &[
    "Value of tracked items for resale.",
    "Standard-Rated Purchases (8%),An expenditure that has been paid for in advance.",
    "An expenditure that has been paid for in advance.",
    "Unrealised currency gains on outstanding items",
    "Gains or losses made due to currency exchange rate changes",
    "A percentage of total earnings paid to the government.",
    "Outstanding invoices the company has issued out to the client but has not yet received in cash at balance date.",
];

const TAX_CODE: &str = "No Tax (0%)";

/// Write `coa0.csv .. coa{n-1}.csv` under the configured directory.
///
/// Codes are sequential across all files, starting at `init_code + 1`.
/// Returns the paths written, in order.
pub fn generate_files<R: Rng + ?Sized>(
    config: &GenerateConfig,
    rng: &mut R,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(&config.output_dir)?;

    let mut next_code = config.init_code;
    let mut files = Vec::with_capacity(config.num_files);

    for n in 0..config.num_files {
        let path = config.output_dir.join(format!("coa{n}.csv"));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(HEADER)?;

        for _ in 0..config.rows_per_file {
            next_code += 1;
            let code = next_code.to_string();
            let name = format!("Test{next_code}");
            let account_type = ACCOUNT_TYPES.choose(rng).copied().unwrap_or("Expense");
            let description = DESCRIPTIONS.choose(rng).copied().unwrap_or_default();
            writer.write_record([
                code.as_str(),
                name.as_str(),
                account_type,
                TAX_CODE,
                description,
                "No",
                "No",
                "Yes",
                "",
            ])?;
        }
        writer.flush()?;

        info!(file = %path.display(), rows = config.rows_per_file, "generated accounts file");
        files.push(path);
    }

    Ok(files)
}

/// Set `key` in a dotenv file, replacing an existing assignment or
/// appending one. Other lines are kept as-is. Creates the file if missing.
pub fn update_env_file(path: &Path, key: &str, value: &str) -> Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    let assignment = format!("{key}=\"{value}\"");
    let mut replaced = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            if is_assignment_of(line, key) {
                replaced = true;
                assignment.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !replaced {
        lines.push(assignment);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    std::fs::write(path, out)?;
    Ok(())
}

fn is_assignment_of(line: &str, key: &str) -> bool {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").unwrap_or(line);
    line.split_once('=').is_some_and(|(name, _)| name.trim() == key)
}

/// Join paths the way `FILES` expects them.
pub fn join_file_list(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(",")
}
