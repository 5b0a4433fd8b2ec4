//! Survey ETL pipeline: stage handlers, sequential executor, retry, and artifact IO.
//!
//! A run moves survey responses through four data stages, each implemented as
//! a [`StageHandler`]:
//! collect (API → bronze), clean (bronze → silver), analyze (silver → gold plus
//! a frequency chart) and export (gold → `.xlsx`). [`PipelineExecutor`] drives
//! them in order between the `start` and `end` markers.

pub mod artifacts;
pub mod chart;
pub mod config;
pub mod engine;
pub mod events;
pub mod handler;
pub mod handlers;
pub mod retry;
pub mod source;

pub use chart::{ChartStyle, ChartText};
pub use config::{AnalysisConfig, ApiConfig, ArtifactConfig, EtlConfig, RetryConfig};
pub use engine::{PipelineExecutor, PipelineResult};
pub use events::{EventEmitter, PipelineEvent};
pub use handler::{
    default_registry, DynHandler, EndHandler, HandlerRegistry, Stage, StageHandler, StartHandler,
};
pub use handlers::clean::{clean_table, CleanReport};
pub use handlers::export::write_workbook;
pub use handlers::{AnalyzeHandler, CleanHandler, CollectHandler, ExportHandler};
pub use retry::{execute_with_retry, BackoffPolicy};
pub use source::{parse_responses, Record, ResponseSource, SurveyApiClient};
