//! Clean stage: bronze minus incomplete and repeated rows becomes silver.

use async_trait::async_trait;
use serde_json::json;

use survey_etl_types::{Context, Layer, Outcome, Result, Table};

use crate::artifacts::{load_input, store_output};
use crate::config::EtlConfig;
use crate::handler::{Stage, StageHandler};

/// Rows shown in the silver preview log line.
const PREVIEW_ROWS: usize = 5;

/// Row accounting for one cleaning pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanReport {
    pub input_rows: usize,
    pub dropped_missing: usize,
    pub dropped_duplicates: usize,
}

/// Drop rows with a missing cell, then exact duplicates (first one wins).
/// Surviving rows keep their relative order.
pub fn clean_table(bronze: &Table) -> (Table, CleanReport) {
    let complete = bronze.drop_missing();
    let silver = complete.drop_duplicates();
    let report = CleanReport {
        input_rows: bronze.len(),
        dropped_missing: bronze.len() - complete.len(),
        dropped_duplicates: complete.len() - silver.len(),
    };
    (silver, report)
}

fn preview(table: &Table) -> String {
    let mut buf = Vec::new();
    match table.head(PREVIEW_ROWS).to_csv_writer(&mut buf) {
        Ok(()) => String::from_utf8_lossy(&buf).into_owned(),
        Err(e) => format!("<preview unavailable: {e}>"),
    }
}

pub struct CleanHandler;

#[async_trait]
impl StageHandler for CleanHandler {
    fn stage(&self) -> Stage {
        Stage::Clean
    }

    async fn execute(&self, context: &Context, config: &EtlConfig) -> Result<Outcome> {
        let bronze = load_input(context, config, Stage::Clean, Layer::Bronze).await?;
        let (silver, report) = clean_table(&bronze);
        let rows = silver.len();

        tracing::info!(
            stage = "clean",
            input_rows = report.input_rows,
            dropped_missing = report.dropped_missing,
            dropped_duplicates = report.dropped_duplicates,
            rows,
            "Silver layer ready"
        );
        tracing::info!(stage = "clean", "Silver preview:\n{}", preview(&silver));

        let written = store_output(context, config, Layer::Silver, silver).await?;

        let mut outcome = Outcome::success(format!(
            "Kept {rows} of {} rows ({} incomplete, {} duplicate)",
            report.input_rows, report.dropped_missing, report.dropped_duplicates
        ))
        .with_update("clean.rows", json!(rows))
        .with_update("clean.dropped_missing", json!(report.dropped_missing))
        .with_update("clean.dropped_duplicates", json!(report.dropped_duplicates));
        if let Some(path) = written {
            outcome = outcome.with_update("silver.path", json!(path.display().to_string()));
        }
        Ok(outcome)
    }
}
