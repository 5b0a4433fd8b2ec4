//! Stage handler trait, dynamic dispatch wrapper, and handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use survey_etl_types::{Context, EtlError, Outcome, Result};

use crate::config::EtlConfig;
use crate::source::ResponseSource;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// The fixed steps of a run. `Start` and `End` are boundary markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Start,
    Collect,
    Clean,
    Analyze,
    Export,
    End,
}

impl Stage {
    /// Execution order of a full run.
    pub const SEQUENCE: [Stage; 6] = [
        Stage::Start,
        Stage::Collect,
        Stage::Clean,
        Stage::Analyze,
        Stage::Export,
        Stage::End,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Collect => "collect",
            Stage::Clean => "clean",
            Stage::Analyze => "analyze",
            Stage::Export => "export",
            Stage::End => "end",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        Stage::SEQUENCE
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| EtlError::Other(format!("unknown stage '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// StageHandler trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait StageHandler: Send + Sync {
    /// The stage this handler implements.
    fn stage(&self) -> Stage;

    /// Execute the stage. Failure is signalled either by an error or by an
    /// outcome with [`survey_etl_types::StageStatus::Fail`].
    async fn execute(&self, context: &Context, config: &EtlConfig) -> Result<Outcome>;
}

// ---------------------------------------------------------------------------
// DynHandler: object-safe wrapper
// ---------------------------------------------------------------------------

pub struct DynHandler(Box<dyn StageHandler>);

impl DynHandler {
    pub fn new(handler: impl StageHandler + 'static) -> Self {
        Self(Box::new(handler))
    }

    pub fn stage(&self) -> Stage {
        self.0.stage()
    }

    pub async fn execute(&self, context: &Context, config: &EtlConfig) -> Result<Outcome> {
        self.0.execute(context, config).await
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<Stage, DynHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous handler for the same stage.
    pub fn register(&mut self, handler: impl StageHandler + 'static) {
        self.handlers.insert(handler.stage(), DynHandler::new(handler));
    }

    pub fn get(&self, stage: Stage) -> Option<&DynHandler> {
        self.handlers.get(&stage)
    }

    pub fn has(&self, stage: Stage) -> bool {
        self.handlers.contains_key(&stage)
    }
}

// ---------------------------------------------------------------------------
// Boundary handlers
// ---------------------------------------------------------------------------

pub struct StartHandler;

#[async_trait]
impl StageHandler for StartHandler {
    fn stage(&self) -> Stage {
        Stage::Start
    }

    async fn execute(&self, _ctx: &Context, _config: &EtlConfig) -> Result<Outcome> {
        Ok(Outcome::success("Pipeline started"))
    }
}

pub struct EndHandler;

#[async_trait]
impl StageHandler for EndHandler {
    fn stage(&self) -> Stage {
        Stage::End
    }

    async fn execute(&self, _ctx: &Context, _config: &EtlConfig) -> Result<Outcome> {
        Ok(Outcome::success("Pipeline completed"))
    }
}

// ---------------------------------------------------------------------------
// Default registry factory
// ---------------------------------------------------------------------------

/// Registry with every stage of a full run; responses come from `source`.
pub fn default_registry(source: Arc<dyn ResponseSource>) -> HandlerRegistry {
    let mut reg = HandlerRegistry::new();
    reg.register(StartHandler);
    reg.register(crate::handlers::CollectHandler::new(source));
    reg.register(crate::handlers::CleanHandler);
    reg.register(crate::handlers::AnalyzeHandler::default());
    reg.register(crate::handlers::ExportHandler);
    reg.register(EndHandler);
    reg
}
