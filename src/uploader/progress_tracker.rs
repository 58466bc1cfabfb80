use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::models::{FailedUpload, Phase, PipelineProgress};

/// Everything display code needs to render a run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PipelineSnapshot {
    pub run_id: Option<String>,
    pub progress: PipelineProgress,
    pub pending_manual: Option<Vec<String>>,
    pub failed_uploads: Vec<FailedUpload>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineSnapshot {
    pub fn baseline() -> Self {
        Self {
            run_id: None,
            progress: PipelineProgress::default(),
            pending_manual: None,
            failed_uploads: Vec::new(),
            error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn is_baseline(&self) -> bool {
        self.run_id.is_none()
            && self.progress == PipelineProgress::default()
            && self.pending_manual.is_none()
            && self.failed_uploads.is_empty()
            && self.error.is_none()
    }

    pub fn needs_manual_assignment(&self) -> bool {
        self.pending_manual.is_some()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted { total: usize },
    ItemUploaded { index: usize, url: String },
    ItemFailed { index: usize, name: String, error: String },
    PhaseChanged { phase: Phase },
    ManualRequired { urls: Vec<String> },
    Completed { added: usize },
    Failed { message: String },
    Reset,
    /// Every published progress value, in order. The snapshot channel only keeps the latest.
    Progress { progress: PipelineProgress },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PipelineEvent {
    pub run_id: Option<String>,
    pub kind: EventKind,
    pub at: DateTime<Utc>,
}

/// Publishes the current snapshot and a stream of transition events.
pub struct ProgressTracker {
    snapshot_tx: watch::Sender<PipelineSnapshot>,
    events_tx: broadcast::Sender<PipelineEvent>,
}

impl ProgressTracker {
    pub fn new(event_buffer: usize) -> Self {
        let (snapshot_tx, _) = watch::channel(PipelineSnapshot::baseline());
        let (events_tx, _) = broadcast::channel(event_buffer.max(1));
        Self {
            snapshot_tx,
            events_tx,
        }
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events_tx.subscribe()
    }

    pub fn publish(&self, mut snapshot: PipelineSnapshot) {
        snapshot.updated_at = Utc::now();
        log::debug!(
            "Progress: {} {}/{} - {}",
            snapshot
                .progress
                .phase
                .map(|p| p.to_string())
                .unwrap_or_else(|| "idle".to_string()),
            snapshot.progress.current,
            snapshot.progress.total,
            snapshot.progress.message
        );
        let run_id = snapshot.run_id.clone();
        let progress = snapshot.progress.clone();
        self.snapshot_tx.send_replace(snapshot);
        self.emit(run_id.as_deref(), EventKind::Progress { progress });
    }

    /// Emit a transition event. Having no listeners is not an error.
    pub fn emit(&self, run_id: Option<&str>, kind: EventKind) -> bool {
        let event = PipelineEvent {
            run_id: run_id.map(str::to_string),
            kind,
            at: Utc::now(),
        };

        match self.events_tx.send(event) {
            Ok(receivers) => {
                log::debug!("Emitted pipeline event to {} receiver(s)", receivers);
                true
            }
            Err(e) => {
                log::debug!("No listeners for pipeline event {:?} (non-critical)", e.0.kind);
                false
            }
        }
    }
}
