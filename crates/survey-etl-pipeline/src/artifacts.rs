//! Handoff of layer tables between stages.
//!
//! A stage reads its input from the run [`Context`] when an earlier stage of the
//! same run produced it, and falls back to the artifact file otherwise.

use std::path::PathBuf;

use survey_etl_types::{Context, EtlError, Layer, Result, Table};

use crate::config::EtlConfig;
use crate::handler::Stage;

/// Load the table a stage consumes.
pub async fn load_input(
    context: &Context,
    config: &EtlConfig,
    stage: Stage,
    layer: Layer,
) -> Result<Table> {
    if let Some(table) = context.table(layer).await {
        tracing::debug!(stage = %stage, layer = %layer, rows = table.len(), "Input taken from context");
        return Ok(table);
    }

    let path = config.artifacts.path_for(layer);
    if !tokio::fs::try_exists(&path).await? {
        return Err(EtlError::StageInputMissing {
            stage: stage.to_string(),
            path,
        });
    }
    let table = Table::read_csv(&path)?;
    tracing::debug!(stage = %stage, layer = %layer, path = %path.display(), rows = table.len(), "Input loaded");
    Ok(table)
}

/// Hand a stage's output to the rest of the run, writing the layer's CSV file
/// when persistence is enabled. Returns the path written, if any.
pub async fn store_output(
    context: &Context,
    config: &EtlConfig,
    layer: Layer,
    table: Table,
) -> Result<Option<PathBuf>> {
    let written = if config.artifacts.persist {
        let path = config.artifacts.path_for(layer);
        table.write_csv(&path)?;
        tracing::info!(layer = %layer, path = %path.display(), rows = table.len(), "Artifact written");
        Some(path)
    } else {
        None
    };
    context.set_table(layer, table).await;
    Ok(written)
}

/// Remove a file left behind by a previous run. Absent files are fine.
pub async fn remove_stale(path: &std::path::Path) -> Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
