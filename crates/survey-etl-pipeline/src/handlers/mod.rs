//! Handlers for the four data stages.

pub mod analyze;
pub mod clean;
pub mod collect;
pub mod export;

pub use analyze::AnalyzeHandler;
pub use clean::CleanHandler;
pub use collect::CollectHandler;
pub use export::ExportHandler;
