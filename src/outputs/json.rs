//! JSON output of the digest.
//!
//! One file per day: a later run on the same day replaces the earlier one.

use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

use crate::error::ScrapeError;
use crate::models::Report;

/// Path the report for `date` (`YYYY-MM-DD`) is written to.
pub fn report_path(json_output_dir: &str, date: &str) -> PathBuf {
    Path::new(json_output_dir).join(format!("{date}.json"))
}

/// Write `report` as pretty JSON to `{json_output_dir}/{today}.json`.
///
/// # Returns
///
/// The path written, or an error if directory creation, serialization or the
/// write itself fails.
#[instrument(level = "info", skip_all, fields(json_output_dir = %json_output_dir))]
pub async fn write_report(report: &Report, json_output_dir: &str) -> Result<PathBuf, ScrapeError> {
    let json = serde_json::to_string_pretty(report)?;

    if let Err(e) = fs::create_dir_all(json_output_dir).await {
        error!(error = %e, "Failed to create JSON dir");
        return Err(e.into());
    }

    let date = Local::now().date_naive().to_string();
    let path = report_path(json_output_dir, &date);
    fs::write(&path, json).await?;
    info!(path = %path.display(), rows = report.rows.len(), "Wrote JSON report");

    Ok(path)
}
