//! Append-only NDJSON record of pipeline runs, one file per day.

use crate::pipeline::RunReport;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File under `dir` that holds the runs started on the report's UTC date.
pub fn journal_path(dir: &Path, report: &RunReport) -> PathBuf {
    dir.join(format!("runs_{}.ndjson", report.started_at.format("%Y-%m-%d")))
}

/// Append `report` as one JSON line and return the file written.
pub fn append_rotating(dir: &Path, report: &RunReport) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = journal_path(dir, report);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    let line = serde_json::to_string(report)?;
    writeln!(file, "{}", line)?;
    Ok(path)
}
