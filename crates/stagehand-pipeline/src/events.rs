//! Pipeline event system for observability.
//!
//! Emits [`StageEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, UIs, editors) can follow a run without
//! coupling to the orchestrator internals.

use serde::{Deserialize, Serialize};

/// Events emitted while stages run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageEvent {
    RunStarted {
        run_id: String,
        stages: Vec<String>,
    },
    RunCompleted {
        run_id: String,
        exit_code: i32,
        duration_ms: u64,
    },
    StageStarted {
        stage: String,
    },
    StageCompleted {
        stage: String,
        status: String,
        diagnostics: usize,
        duration_ms: u64,
    },
    StageFailed {
        stage: String,
        error: String,
    },
    DiagnosticsFlushed {
        stage: String,
        path: String,
        count: usize,
    },
    EntriesDiscovered {
        stage: String,
        entries: Vec<String>,
    },
    EscalationRaised {
        stage: String,
        diagnostics: usize,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<StageEvent>,
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
    pub fn emit(&self, event: StageEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StageEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}
