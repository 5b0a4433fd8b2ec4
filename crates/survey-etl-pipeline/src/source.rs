//! Where survey responses come from: the [`ResponseSource`] seam and the
//! HTTP client for the survey management API.

use std::time::Duration;

use async_trait::async_trait;

use survey_etl_types::{EtlError, Result};

use crate::config::ApiConfig;

/// One raw response object as returned by the API.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// JSON field of the response body holding the response objects.
const DATA_FIELD: &str = "data";

#[async_trait]
pub trait ResponseSource: Send + Sync {
    /// Fetch every response for the configured survey. An empty list is not
    /// an error at this level.
    async fn fetch_responses(&self) -> Result<Vec<Record>>;
}

// ---------------------------------------------------------------------------
// SurveyApiClient
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct SurveyApiClient {
    client: reqwest::Client,
    endpoint: String,
    survey_id: String,
    api_key: String,
}

impl SurveyApiClient {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()
            .map_err(|e| EtlError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: api.endpoint.clone(),
            survey_id: api.survey_id.clone(),
            api_key: api.api_key.clone(),
        })
    }
}

#[async_trait]
impl ResponseSource for SurveyApiClient {
    async fn fetch_responses(&self) -> Result<Vec<Record>> {
        tracing::debug!(endpoint = %self.endpoint, survey_id = %self.survey_id, "Requesting responses");

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("surveyId", self.survey_id.as_str())])
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| EtlError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| EtlError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(EtlError::UpstreamHttp {
                status: status.as_u16(),
                body,
            });
        }

        parse_responses(&body)
    }
}

/// Extract the response objects from a response body.
///
/// A missing or `null` data field yields an empty list.
pub fn parse_responses(body: &str) -> Result<Vec<Record>> {
    let json: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| EtlError::MalformedResponse(format!("body is not JSON: {e}")))?;

    match json.get(DATA_FIELD) {
        None | Some(serde_json::Value::Null) => Ok(Vec::new()),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_object().cloned().ok_or_else(|| {
                    EtlError::MalformedResponse(format!("{DATA_FIELD}[{i}] is not an object"))
                })
            })
            .collect(),
        Some(_) => Err(EtlError::MalformedResponse(format!(
            "`{DATA_FIELD}` is not an array"
        ))),
    }
}
