//! Shared types, errors, context, and outcome for the survey ETL pipeline.
//!
//! This crate provides the foundational types used across the other crates:
//! - `EtlError`: unified error taxonomy
//! - `Context`: thread-safe store for the tables and values stages hand over
//! - `Outcome`: result of executing a stage handler
//! - `Table`: the in-memory tabular data model shared by every stage

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub mod table;

pub use table::Table;

/// Unified error type for all pipeline subsystems.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    // === Collector Errors ===
    #[error("No responses found for survey '{survey_id}'")]
    NoData { survey_id: String },

    #[error("Survey API returned HTTP {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    #[error("Survey API response is malformed: {0}")]
    MalformedResponse(String),

    #[error("Request to survey API failed: {0}")]
    Transport(String),

    // === Stage Errors ===
    #[error("Input for stage '{stage}' is missing: {}", path.display())]
    StageInputMissing { stage: String, path: PathBuf },

    #[error("Stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error("Chart rendering failed: {0}")]
    Chart(String),

    #[error("Spreadsheet export failed: {0}")]
    Spreadsheet(String),

    // === Configuration ===
    #[error("Invalid configuration: {0}")]
    Config(String),

    // === Generic ===
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl EtlError {
    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EtlError::Config(_))
    }
}

/// A convenience alias for `Result<T, EtlError>`.
pub type Result<T> = std::result::Result<T, EtlError>;

// ---------------------------------------------------------------------------
// Layer: refinement level of a dataset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    Bronze,
    Silver,
    Gold,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Bronze => "bronze",
            Layer::Silver => "silver",
            Layer::Gold => "gold",
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Context: thread-safe store for pipeline state
// ---------------------------------------------------------------------------

/// Store shared across the stages of one run.
///
/// Holds the table produced for each [`Layer`] plus free-form JSON values.
/// Cloning a `Context` yields another handle to the **same** inner state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<tokio::sync::RwLock<ContextInner>>,
}

#[derive(Debug, Clone, Default)]
struct ContextInner {
    tables: HashMap<Layer, Table>,
    values: HashMap<String, serde_json::Value>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(ContextInner::default())),
        }
    }

    /// Store the table for a layer, replacing any previous one.
    pub async fn set_table(&self, layer: Layer, table: Table) {
        self.inner.write().await.tables.insert(layer, table);
    }

    /// Read the table for a layer (cloned).
    pub async fn table(&self, layer: Layer) -> Option<Table> {
        self.inner.read().await.tables.get(&layer).cloned()
    }

    /// Insert or overwrite a key.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.write().await.values.insert(key.into(), value);
    }

    /// Read a value by key (cloned).
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.values.get(key).cloned()
    }

    /// Shallow copy of the current values map.
    pub async fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().await.values.clone()
    }

    /// Merge `updates` into the context. Existing keys not present in
    /// `updates` are preserved.
    pub async fn apply_updates(&self, updates: HashMap<String, serde_json::Value>) {
        let mut guard = self.inner.write().await;
        guard.values.extend(updates);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// StageStatus: outcome status of a stage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    /// The stage wrote its artifact but skipped an optional side product.
    PartialSuccess,
    Fail,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::PartialSuccess => "partial_success",
            StageStatus::Fail => "fail",
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome: result of executing a stage handler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: StageStatus,
    pub context_updates: HashMap<String, serde_json::Value>,
    pub notes: String,
    pub failure_reason: Option<String>,
}

impl Outcome {
    /// Create a successful outcome with the given notes.
    pub fn success(notes: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Success,
            context_updates: HashMap::new(),
            notes: notes.into(),
            failure_reason: None,
        }
    }

    /// Create a partially successful outcome with the given notes.
    pub fn partial(notes: impl Into<String>) -> Self {
        Self {
            status: StageStatus::PartialSuccess,
            ..Self::success(notes)
        }
    }

    /// Create a failed outcome with the given reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Fail,
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: Some(reason.into()),
        }
    }

    /// Attach a context update to the outcome.
    pub fn with_update(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context_updates.insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            StageStatus::Success | StageStatus::PartialSuccess
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_no_data() {
        let err = EtlError::NoData {
            survey_id: "abc".into(),
        };
        assert_eq!(err.to_string(), "No responses found for survey 'abc'");
    }

    #[test]
    fn error_display_upstream_http() {
        let err = EtlError::UpstreamHttp {
            status: 500,
            body: "internal server error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Survey API returned HTTP 500: internal server error"
        );
    }

    #[test]
    fn error_display_stage_input_missing() {
        let err = EtlError::StageInputMissing {
            stage: "clean".into(),
            path: PathBuf::from("/data/bronze_data.csv"),
        };
        assert_eq!(
            err.to_string(),
            "Input for stage 'clean' is missing: /data/bronze_data.csv"
        );
    }

    // --- classification ---

    #[test]
    fn only_config_errors_are_terminal() {
        assert!(EtlError::Config("missing api key".into()).is_terminal());
        assert!(!EtlError::NoData {
            survey_id: "x".into()
        }
        .is_terminal());
        assert!(!EtlError::StageInputMissing {
            stage: "export".into(),
            path: PathBuf::from("gold_data.csv"),
        }
        .is_terminal());
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: EtlError = io_err.into();
        assert!(matches!(err, EtlError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    // --- Context ---

    #[tokio::test]
    async fn context_tables_are_keyed_by_layer() {
        let ctx = Context::new();
        let mut table = Table::new(vec!["id".into()]);
        table.push_row(vec![Some("1".into())]);
        ctx.set_table(Layer::Silver, table.clone()).await;

        assert_eq!(ctx.table(Layer::Silver).await, Some(table));
        assert_eq!(ctx.table(Layer::Bronze).await, None);
    }

    #[tokio::test]
    async fn context_clone_shares_state() {
        let ctx = Context::new();
        let handle = ctx.clone();
        handle.set("rows", serde_json::json!(3)).await;
        assert_eq!(ctx.get("rows").await, Some(serde_json::json!(3)));
    }

    #[tokio::test]
    async fn context_apply_updates_merges() {
        let ctx = Context::new();
        ctx.set("keep", serde_json::json!("old")).await;
        ctx.set("overwrite", serde_json::json!("old")).await;

        let mut updates = HashMap::new();
        updates.insert("overwrite".into(), serde_json::json!("new"));
        updates.insert("added".into(), serde_json::json!("fresh"));
        ctx.apply_updates(updates).await;

        let snap = ctx.snapshot().await;
        assert_eq!(snap.get("keep"), Some(&serde_json::json!("old")));
        assert_eq!(snap.get("overwrite"), Some(&serde_json::json!("new")));
        assert_eq!(snap.get("added"), Some(&serde_json::json!("fresh")));
    }

    // --- StageStatus / Outcome ---

    #[test]
    fn stage_status_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&StageStatus::PartialSuccess).unwrap(),
            "\"partial_success\""
        );
        assert_eq!(StageStatus::Fail.as_str(), "fail");
    }

    #[test]
    fn outcome_constructors() {
        let ok = Outcome::success("done").with_update("rows", serde_json::json!(2));
        assert!(ok.is_success());
        assert_eq!(ok.context_updates.get("rows"), Some(&serde_json::json!(2)));

        let partial = Outcome::partial("no chart");
        assert_eq!(partial.status, StageStatus::PartialSuccess);
        assert!(partial.is_success());

        let failed = Outcome::fail("broken");
        assert!(!failed.is_success());
        assert_eq!(failed.failure_reason.as_deref(), Some("broken"));
    }
}
