//! Retry logic with configurable backoff policies for stage execution.

use std::time::Duration;

use survey_etl_types::{Outcome, Result, StageStatus};

use crate::events::{EventEmitter, PipelineEvent};

/// Backoff policy controlling the delay between retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Fixed delay between retries.
    Fixed(Duration),
    /// No delay between retries.
    None,
}

impl BackoffPolicy {
    /// Delay before the next attempt.
    pub fn delay(&self) -> Duration {
        match self {
            BackoffPolicy::Fixed(d) => *d,
            BackoffPolicy::None => Duration::ZERO,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed(Duration::from_secs(300))
    }
}

/// Execute a stage with retry logic.
///
/// The closure `f` is called up to `max_retries + 1` times. A stage is retried
/// when it returns an outcome with [`StageStatus::Fail`] or any error that is
/// not [`survey_etl_types::EtlError::is_terminal`]. Between retries the
/// function sleeps for the duration dictated by `policy`. The last attempt's
/// result is returned as-is.
pub async fn execute_with_retry<F, Fut>(
    f: F,
    max_retries: usize,
    policy: &BackoffPolicy,
    stage: &str,
    events: Option<&EventEmitter>,
) -> Result<Outcome>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<Outcome>>,
{
    let mut attempt = 0;
    loop {
        let result = f().await;
        let retry = attempt < max_retries
            && match &result {
                Ok(outcome) => outcome.status == StageStatus::Fail,
                Err(e) => !e.is_terminal(),
            };
        if !retry {
            return result;
        }

        let delay = policy.delay();
        match &result {
            Ok(outcome) => tracing::warn!(
                stage = %stage,
                attempt,
                delay_ms = %delay.as_millis(),
                reason = outcome.failure_reason.as_deref().unwrap_or(""),
                "Stage failed, retrying"
            ),
            Err(e) => tracing::warn!(
                stage = %stage,
                attempt,
                delay_ms = %delay.as_millis(),
                error = %e,
                "Stage error, retrying"
            ),
        }
        notify_retry(events, stage, attempt, delay);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

fn notify_retry(events: Option<&EventEmitter>, stage: &str, attempt: usize, delay: Duration) {
    if let Some(events) = events {
        events.emit(PipelineEvent::StageRetrying {
            stage: stage.to_string(),
            attempt: attempt + 1,
            delay_ms: delay.as_millis() as u64,
        });
    }
}
