//! Sequential pipeline executor.
//!
//! Runs stages strictly in order on one shared [`Context`]. A stage that
//! fails after its retries aborts the run; later stages never start.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use survey_etl_types::{Context, EtlError, Outcome, Result};

use crate::config::EtlConfig;
use crate::events::{EventEmitter, PipelineEvent};
use crate::handler::{default_registry, HandlerRegistry, Stage};
use crate::retry::execute_with_retry;
use crate::source::SurveyApiClient;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Owns the handler registry and the run configuration.
pub struct PipelineExecutor {
    registry: HandlerRegistry,
    config: EtlConfig,
    events: EventEmitter,
}

/// The result of a completed run.
#[derive(Debug)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed_stages: Vec<Stage>,
    pub stage_outcomes: HashMap<Stage, Outcome>,
    pub final_context: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

impl PipelineExecutor {
    pub fn new(registry: HandlerRegistry, config: EtlConfig) -> Self {
        Self {
            registry,
            config,
            events: EventEmitter::default(),
        }
    }

    /// Executor with the default handlers, collecting from the survey API
    /// described by `config.api`.
    pub fn from_config(config: EtlConfig) -> Result<Self> {
        let source = Arc::new(SurveyApiClient::new(&config.api)?);
        Ok(Self::new(default_registry(source), config))
    }

    pub fn config(&self) -> &EtlConfig {
        &self.config
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Run every stage: start, collect, clean, analyze, export, end.
    pub async fn run(&self) -> Result<PipelineResult> {
        self.run_stages(&Stage::SEQUENCE).await
    }

    /// Run a single stage against the artifacts already on disk.
    pub async fn run_stage(&self, stage: Stage) -> Result<PipelineResult> {
        self.run_stages(&[stage]).await
    }

    /// Run `stages` in the given order on a fresh context.
    pub async fn run_stages(&self, stages: &[Stage]) -> Result<PipelineResult> {
        self.config.validate(stages.contains(&Stage::Collect))?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let context = Context::new();
        let mut completed_stages: Vec<Stage> = Vec::new();
        let mut stage_outcomes: HashMap<Stage, Outcome> = HashMap::new();

        tracing::info!(run_id = %run_id, stages = stages.len(), "Pipeline run started");
        self.events.emit(PipelineEvent::PipelineStarted {
            run_id: run_id.to_string(),
            stages: stages.iter().map(|s| s.to_string()).collect(),
        });

        for &stage in stages {
            match self.execute_stage(stage, &context).await {
                Ok(outcome) => {
                    context.apply_updates(outcome.context_updates.clone()).await;
                    context
                        .set(
                            format!("{stage}.status"),
                            serde_json::Value::String(outcome.status.as_str().into()),
                        )
                        .await;
                    completed_stages.push(stage);
                    stage_outcomes.insert(stage, outcome);
                }
                Err(e) => {
                    tracing::error!(run_id = %run_id, stage = %stage, error = %e, "Pipeline run failed");
                    self.events.emit(PipelineEvent::PipelineFailed {
                        run_id: run_id.to_string(),
                        stage: stage.to_string(),
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        let duration_ms = clock.elapsed().as_millis() as u64;
        tracing::info!(run_id = %run_id, duration_ms, "Pipeline run completed");
        self.events.emit(PipelineEvent::PipelineCompleted {
            run_id: run_id.to_string(),
            completed_stages: completed_stages.iter().map(|s| s.to_string()).collect(),
            duration_ms,
        });

        Ok(PipelineResult {
            run_id,
            started_at,
            finished_at: Utc::now(),
            completed_stages,
            stage_outcomes,
            final_context: context.snapshot().await,
        })
    }

    /// Dispatch one stage with retry, turning a failed outcome into an error.
    async fn execute_stage(&self, stage: Stage, context: &Context) -> Result<Outcome> {
        let handler = self
            .registry
            .get(stage)
            .ok_or_else(|| EtlError::StageFailed {
                stage: stage.to_string(),
                message: "No handler registered".into(),
            })?;

        let name = stage.to_string();
        let clock = Instant::now();
        tracing::info!(stage = %name, "Stage started");
        self.events.emit(PipelineEvent::StageStarted {
            stage: name.clone(),
        });

        let result = execute_with_retry(
            || handler.execute(context, &self.config),
            self.config.retry.max_retries,
            &self.config.retry.backoff(),
            &name,
            Some(&self.events),
        )
        .await
        .and_then(|outcome| {
            if outcome.is_success() {
                Ok(outcome)
            } else {
                Err(EtlError::StageFailed {
                    stage: name.clone(),
                    message: outcome
                        .failure_reason
                        .unwrap_or_else(|| "stage reported failure".into()),
                })
            }
        });

        match &result {
            Ok(outcome) => {
                let duration_ms = clock.elapsed().as_millis() as u64;
                tracing::info!(stage = %name, status = outcome.status.as_str(), duration_ms, notes = %outcome.notes, "Stage completed");
                self.events.emit(PipelineEvent::StageCompleted {
                    stage: name,
                    status: outcome.status.as_str().to_string(),
                    duration_ms,
                });
            }
            Err(e) => {
                self.events.emit(PipelineEvent::StageFailed {
                    stage: name,
                    error: e.to_string(),
                });
            }
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArtifactConfig, RetryConfig};
    use crate::handler::{EndHandler, StageHandler, StartHandler};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quiet_config(dir: &std::path::Path) -> EtlConfig {
        EtlConfig {
            artifacts: ArtifactConfig::in_dir(dir),
            retry: RetryConfig {
                max_retries: 1,
                delay_secs: 0,
            },
            ..EtlConfig::default()
        }
    }

    struct CountingHandler {
        stage: Stage,
        calls: Arc<AtomicUsize>,
        fail_first: usize,
    }

    #[async_trait]
    impl StageHandler for CountingHandler {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn execute(&self, _ctx: &Context, _config: &EtlConfig) -> Result<Outcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(EtlError::Transport("connection reset".into()))
            } else {
                Ok(Outcome::success(format!("{} ok", self.stage))
                    .with_update(format!("{}.calls", self.stage), serde_json::json!(n + 1)))
            }
        }
    }

    struct FailingOutcomeHandler;

    #[async_trait]
    impl StageHandler for FailingOutcomeHandler {
        fn stage(&self) -> Stage {
            Stage::Clean
        }

        async fn execute(&self, _ctx: &Context, _config: &EtlConfig) -> Result<Outcome> {
            Ok(Outcome::fail("bronze unreadable"))
        }
    }

    fn counting(stage: Stage, fail_first: usize) -> (CountingHandler, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            CountingHandler {
                stage,
                calls: calls.clone(),
                fail_first,
            },
            calls,
        )
    }

    #[tokio::test]
    async fn stages_run_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register(StartHandler);
        registry.register(EndHandler);
        for stage in [Stage::Collect, Stage::Clean, Stage::Analyze, Stage::Export] {
            registry.register(counting(stage, 0).0);
        }

        let mut config = quiet_config(dir.path());
        config.api.survey_id = "s".into();
        config.api.api_key = "k".into();
        let executor = PipelineExecutor::new(registry, config);
        let result = executor.run().await.unwrap();

        assert_eq!(result.completed_stages, Stage::SEQUENCE.to_vec());
        assert_eq!(
            result.final_context.get("analyze.status"),
            Some(&serde_json::json!("success"))
        );
        assert_eq!(result.final_context.get("export.calls"), Some(&serde_json::json!(1)));
        assert!(result.finished_at >= result.started_at);
    }

    #[tokio::test]
    async fn failed_stage_is_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, calls) = counting(Stage::Clean, 1);
        let mut registry = HandlerRegistry::new();
        registry.register(handler);

        let executor = PipelineExecutor::new(registry, quiet_config(dir.path()));
        let result = executor.run_stage(Stage::Clean).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.completed_stages, vec![Stage::Clean]);
    }

    #[tokio::test]
    async fn failure_after_retries_aborts_run() {
        let dir = tempfile::tempdir().unwrap();
        let (clean, clean_calls) = counting(Stage::Clean, 5);
        let (analyze, analyze_calls) = counting(Stage::Analyze, 0);
        let mut registry = HandlerRegistry::new();
        registry.register(clean);
        registry.register(analyze);

        let executor = PipelineExecutor::new(registry, quiet_config(dir.path()));
        let err = executor
            .run_stages(&[Stage::Clean, Stage::Analyze])
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::Transport(_)));
        assert_eq!(clean_calls.load(Ordering::SeqCst), 2);
        assert_eq!(analyze_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_outcome_becomes_stage_failed_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register(FailingOutcomeHandler);

        let executor = PipelineExecutor::new(registry, quiet_config(dir.path()));
        let err = executor.run_stage(Stage::Clean).await.unwrap_err();
        match err {
            EtlError::StageFailed { stage, message } => {
                assert_eq!(stage, "clean");
                assert_eq!(message, "bronze unreadable");
            }
            other => panic!("Expected StageFailed, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unregistered_stage_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = PipelineExecutor::new(HandlerRegistry::new(), quiet_config(dir.path()));
        let err = executor.run_stage(Stage::Export).await.unwrap_err();
        assert!(matches!(err, EtlError::StageFailed { .. }));
    }

    #[tokio::test]
    async fn collect_requires_api_settings() {
        let dir = tempfile::tempdir().unwrap();
        let (collect, calls) = counting(Stage::Collect, 0);
        let mut registry = HandlerRegistry::new();
        registry.register(collect);

        let executor = PipelineExecutor::new(registry, quiet_config(dir.path()));
        let err = executor.run_stage(Stage::Collect).await.unwrap_err();
        assert!(matches!(err, EtlError::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn events_trace_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let (clean, _) = counting(Stage::Clean, 1);
        let mut registry = HandlerRegistry::new();
        registry.register(clean);

        let executor = PipelineExecutor::new(registry, quiet_config(dir.path()));
        let mut rx = executor.events().subscribe();
        executor.run_stage(Stage::Clean).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                PipelineEvent::PipelineStarted { .. } => "pipeline_started",
                PipelineEvent::StageStarted { .. } => "stage_started",
                PipelineEvent::StageRetrying { .. } => "stage_retrying",
                PipelineEvent::StageCompleted { .. } => "stage_completed",
                PipelineEvent::PipelineCompleted { .. } => "pipeline_completed",
                PipelineEvent::StageFailed { .. } => "stage_failed",
                PipelineEvent::PipelineFailed { .. } => "pipeline_failed",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "pipeline_started",
                "stage_started",
                "stage_retrying",
                "stage_completed",
                "pipeline_completed",
            ]
        );
    }
}
