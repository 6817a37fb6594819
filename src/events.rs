//! Typed push-stream envelopes and the fan-out primitive behind
//! `/events`. Producers fire and forget; subscriber lifetime and write
//! serialization belong to the server side.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::ProgressSnapshot;

/// Messages streamed to dashboard subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Status {
        state: String,
        message: String,
    },
    Step {
        label: String,
    },
    Progress {
        farm_index: usize,
        total_farms: usize,
        farm_name: String,
        step: String,
        percent: f64,
    },
    Log {
        level: String,
        message: String,
        at: String,
    },
    Screenshot {
        path: String,
        label: String,
    },
    Manager {
        manager: String,
    },
    ReportUpdate {
        farm: String,
        status: String,
        reason: String,
    },
    UpdateFarmCount {
        max_farms: usize,
    },
}

/// Cheap cloneable handle for publishing envelopes. A slow or dead
/// subscriber never blocks the producer; lagged receivers drop messages
/// on their own side.
#[derive(Clone)]
pub struct Broadcaster {
    tx: broadcast::Sender<Envelope>,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }

    /// Publish without caring whether anyone listens.
    pub fn send(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }

    pub fn status(&self, state: &str, message: impl Into<String>) {
        self.send(Envelope::Status {
            state: state.to_string(),
            message: message.into(),
        });
    }

    pub fn step(&self, label: impl Into<String>) {
        self.send(Envelope::Step { label: label.into() });
    }

    pub fn progress(&self, snapshot: &ProgressSnapshot) {
        self.send(Envelope::Progress {
            farm_index: snapshot.farm_index,
            total_farms: snapshot.total_farms,
            farm_name: snapshot.farm_name.clone(),
            step: snapshot.step.clone(),
            percent: snapshot.percent,
        });
    }

    pub fn log(&self, level: &str, message: impl Into<String>) {
        self.send(Envelope::Log {
            level: level.to_string(),
            message: message.into(),
            at: chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        });
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.log("info", message);
    }

    pub fn log_warn(&self, message: impl Into<String>) {
        self.log("warn", message);
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.log("error", message);
    }
}
