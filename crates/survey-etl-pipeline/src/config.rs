//! Run configuration passed explicitly to every stage.
//!
//! Loaded from an optional TOML file; every section and field falls back to
//! its default, so a file only needs the values it changes.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use survey_etl_types::{EtlError, Layer, Result};

use crate::retry::BackoffPolicy;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EtlConfig {
    pub api: ApiConfig,
    pub artifacts: ArtifactConfig,
    pub analysis: AnalysisConfig,
    pub retry: RetryConfig,
}

/// Survey API connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Responses endpoint; the survey id is sent as the `surveyId` query parameter.
    pub endpoint: String,
    pub survey_id: String,
    /// Sent verbatim in the `x-api-key` header.
    pub api_key: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://formbricks:3000/api/v1/management/responses".into(),
            survey_id: String::new(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Where stage artifacts live. File names are joined onto `dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
    pub bronze: String,
    pub silver: String,
    pub gold: String,
    pub chart: String,
    pub export: String,
    /// Write the bronze/silver/gold CSV files. The chart and the spreadsheet
    /// are always written.
    pub persist: bool,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data"),
            bronze: "bronze_data.csv".into(),
            silver: "silver_data.csv".into(),
            gold: "gold_data.csv".into(),
            chart: "analysis_plot.png".into(),
            export: "final_data.xlsx".into(),
            persist: true,
        }
    }
}

impl ArtifactConfig {
    /// Artifacts rooted at `dir` with the default file names.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    pub fn path_for(&self, layer: Layer) -> PathBuf {
        let name = match layer {
            Layer::Bronze => &self.bronze,
            Layer::Silver => &self.silver,
            Layer::Gold => &self.gold,
        };
        self.dir.join(name)
    }

    pub fn chart_path(&self) -> PathBuf {
        self.dir.join(&self.chart)
    }

    pub fn export_path(&self) -> PathBuf {
        self.dir.join(&self.export)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Column whose distinct values are counted and charted.
    pub count_column: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            count_column: "question_id".into(),
        }
    }
}

/// Per-stage retry applied by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            delay_secs: 300,
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        if self.delay_secs == 0 {
            BackoffPolicy::None
        } else {
            BackoffPolicy::Fixed(Duration::from_secs(self.delay_secs))
        }
    }
}

impl EtlConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| EtlError::Config(format!("invalid TOML: {e}")))
    }

    /// Read a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| EtlError::Config(e.to_string()))
    }

    /// Check the settings a run depends on. API settings are only required
    /// when the run contacts the survey API.
    pub fn validate(&self, require_api: bool) -> Result<()> {
        if require_api {
            if self.api.endpoint.trim().is_empty() {
                return Err(EtlError::Config("api.endpoint is empty".into()));
            }
            if self.api.survey_id.trim().is_empty() {
                return Err(EtlError::Config("api.survey_id is empty".into()));
            }
            if self.api.api_key.trim().is_empty() {
                return Err(EtlError::Config("api.api_key is empty".into()));
            }
        }
        if self.analysis.count_column.is_empty() {
            return Err(EtlError::Config("analysis.count_column is empty".into()));
        }
        let names = [
            ("artifacts.bronze", &self.artifacts.bronze),
            ("artifacts.silver", &self.artifacts.silver),
            ("artifacts.gold", &self.artifacts.gold),
            ("artifacts.chart", &self.artifacts.chart),
            ("artifacts.export", &self.artifacts.export),
        ];
        for (key, name) in names {
            if name.trim().is_empty() {
                return Err(EtlError::Config(format!("{key} is empty")));
            }
        }
        Ok(())
    }

    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.api.api_key.is_empty() {
            copy.api.api_key = "***".into();
        }
        copy
    }
}
