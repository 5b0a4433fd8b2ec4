//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, schedulers, dashboards) can follow a run
//! without coupling to the executor internals.

use serde::{Deserialize, Serialize};

/// Events emitted during a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    PipelineStarted {
        run_id: String,
        stages: Vec<String>,
    },
    PipelineCompleted {
        run_id: String,
        completed_stages: Vec<String>,
        duration_ms: u64,
    },
    PipelineFailed {
        run_id: String,
        stage: String,
        error: String,
    },
    StageStarted {
        stage: String,
    },
    StageCompleted {
        stage: String,
        status: String,
        duration_ms: u64,
    },
    StageFailed {
        stage: String,
        error: String,
    },
    StageRetrying {
        stage: String,
        attempt: usize,
        delay_ms: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(64)
    }
}
