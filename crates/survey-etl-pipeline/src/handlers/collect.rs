//! Collect stage: survey API responses into the bronze layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use survey_etl_types::{Context, EtlError, Layer, Outcome, Result, Table};

use crate::artifacts::store_output;
use crate::config::EtlConfig;
use crate::handler::{Stage, StageHandler};
use crate::source::ResponseSource;

pub struct CollectHandler {
    source: Arc<dyn ResponseSource>,
}

impl CollectHandler {
    pub fn new(source: Arc<dyn ResponseSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl StageHandler for CollectHandler {
    fn stage(&self) -> Stage {
        Stage::Collect
    }

    async fn execute(&self, context: &Context, config: &EtlConfig) -> Result<Outcome> {
        let records = self.source.fetch_responses().await?;
        if records.is_empty() {
            return Err(EtlError::NoData {
                survey_id: config.api.survey_id.clone(),
            });
        }

        let bronze = Table::from_records(&records);
        let rows = bronze.len();
        let columns = bronze.columns().len();
        tracing::info!(stage = "collect", rows, columns, "Responses collected");

        let written = store_output(context, config, Layer::Bronze, bronze).await?;

        let mut outcome = Outcome::success(format!("Collected {rows} responses"))
            .with_update("collect.rows", json!(rows));
        if let Some(path) = written {
            outcome = outcome.with_update("bronze.path", json!(path.display().to_string()));
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArtifactConfig;
    use crate::source::Record;

    struct FixedSource(Vec<Record>);

    #[async_trait]
    impl ResponseSource for FixedSource {
        async fn fetch_responses(&self) -> Result<Vec<Record>> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl ResponseSource for FailingSource {
        async fn fetch_responses(&self) -> Result<Vec<Record>> {
            Err(EtlError::UpstreamHttp {
                status: 401,
                body: "unauthorized".into(),
            })
        }
    }

    fn config_in(dir: &std::path::Path) -> EtlConfig {
        let mut config = EtlConfig {
            artifacts: ArtifactConfig::in_dir(dir),
            ..EtlConfig::default()
        };
        config.api.survey_id = "survey-1".into();
        config
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn writes_bronze_and_hands_over_table() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let ctx = Context::new();
        let handler = CollectHandler::new(Arc::new(FixedSource(vec![
            record(json!({"id": 1, "question_id": "q1"})),
            record(json!({"id": 2, "question_id": "q2"})),
        ])));

        let outcome = handler.execute(&ctx, &config).await.unwrap();
        assert_eq!(outcome.context_updates["collect.rows"], json!(2));

        let on_disk = std::fs::read_to_string(dir.path().join("bronze_data.csv")).unwrap();
        assert_eq!(on_disk, "id,question_id\n1,q1\n2,q2\n");
        assert_eq!(ctx.table(Layer::Bronze).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_response_is_no_data_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let handler = CollectHandler::new(Arc::new(FixedSource(Vec::new())));

        let err = handler.execute(&Context::new(), &config).await.unwrap_err();
        match err {
            EtlError::NoData { survey_id } => assert_eq!(survey_id, "survey-1"),
            other => panic!("Expected NoData, got: {other:?}"),
        }
        assert!(!dir.path().join("bronze_data.csv").exists());
    }

    #[tokio::test]
    async fn source_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let handler = CollectHandler::new(Arc::new(FailingSource));

        let err = handler.execute(&Context::new(), &config).await.unwrap_err();
        assert!(
            matches!(err, EtlError::UpstreamHttp { status: 401, .. }),
            "got: {err:?}"
        );
    }
}
