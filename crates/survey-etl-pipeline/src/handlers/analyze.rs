//! Analyze stage: frequency chart of the counted column, silver passed through as gold.

use async_trait::async_trait;
use serde_json::json;

use survey_etl_types::{Context, Layer, Outcome, Result};

use crate::artifacts::{load_input, remove_stale, store_output};
use crate::chart::{self, ChartStyle, ChartText};
use crate::config::EtlConfig;
use crate::handler::{Stage, StageHandler};

#[derive(Default)]
pub struct AnalyzeHandler {
    style: ChartStyle,
}

impl AnalyzeHandler {
    pub fn with_style(style: ChartStyle) -> Self {
        Self { style }
    }
}

fn counts_json(counts: &[(String, usize)]) -> serde_json::Value {
    counts
        .iter()
        .map(|(value, count)| json!({ "value": value, "count": count }))
        .collect()
}

#[async_trait]
impl StageHandler for AnalyzeHandler {
    fn stage(&self) -> Stage {
        Stage::Analyze
    }

    async fn execute(&self, context: &Context, config: &EtlConfig) -> Result<Outcome> {
        let silver = load_input(context, config, Stage::Analyze, Layer::Silver).await?;
        let column = config.analysis.count_column.as_str();
        let chart_path = config.artifacts.chart_path();

        let mut outcome = match silver.value_counts(column) {
            Some(counts) => {
                chart::save(&counts, &ChartText::for_column(column), &chart_path, &self.style)?;
                tracing::info!(
                    stage = "analyze",
                    column,
                    distinct = counts.len(),
                    path = %chart_path.display(),
                    "Frequency chart generated"
                );
                Outcome::success(format!(
                    "Charted {} distinct '{column}' values",
                    counts.len()
                ))
                .with_update("analyze.counts", counts_json(&counts))
                .with_update("chart.path", json!(chart_path.display().to_string()))
            }
            None => {
                tracing::info!(stage = "analyze", column, "Column not found, chart skipped");
                if remove_stale(&chart_path).await? {
                    tracing::debug!(path = %chart_path.display(), "Removed chart from previous run");
                }
                Outcome::partial(format!("Column '{column}' not found; no chart"))
            }
        };

        let rows = silver.len();
        if let Some(path) = store_output(context, config, Layer::Gold, silver).await? {
            outcome = outcome.with_update("gold.path", json!(path.display().to_string()));
        }
        Ok(outcome.with_update("analyze.rows", json!(rows)))
    }
}
