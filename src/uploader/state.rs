// Run state machine: Idle -> Uploading -> Analyzing -> (PendingManual) -> Complete | Failed
//
// Transitions are pure so the pipeline can hold the state behind a lock and
// derive everything observers see from it.

use crate::errors::AppError;
use crate::models::{ClassificationOutcome, Phase, PipelineProgress};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Uploading {
        current: usize,
        total: usize,
        succeeded: usize,
    },
    Analyzing {
        submitted: usize,
    },
    PendingManual {
        submitted: usize,
        rejected: Vec<String>,
    },
    Complete {
        added: usize,
    },
    Failed {
        message: String,
        current: usize,
        total: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Start { total: usize },
    ItemAttempted { index: usize, succeeded: bool },
    UploadsFinished,
    Classified(ClassificationOutcome),
    ManualAccepted,
    Fail { message: String },
    Reset,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Complete { .. } | PipelineState::Failed { .. })
    }

    /// URLs awaiting a manual category, if the run is paused for them.
    pub fn pending_manual(&self) -> Option<&[String]> {
        match self {
            PipelineState::PendingManual { rejected, .. } => Some(rejected),
            _ => None,
        }
    }

    pub fn progress(&self) -> PipelineProgress {
        match self {
            PipelineState::Idle => PipelineProgress::default(),
            PipelineState::Uploading { current, total, .. } => PipelineProgress {
                phase: Some(Phase::Uploading),
                current: *current,
                total: *total,
                message: if *current == 0 {
                    format!("Preparing {} image(s)", total)
                } else {
                    format!("Uploading image {} of {}", current, total)
                },
            },
            PipelineState::Analyzing { submitted } => PipelineProgress {
                phase: Some(Phase::Analyzing),
                current: 0,
                total: *submitted,
                message: format!("Analyzing {} item(s)", submitted),
            },
            PipelineState::PendingManual {
                submitted,
                rejected,
            } => PipelineProgress {
                phase: Some(Phase::Analyzing),
                current: submitted.saturating_sub(rejected.len()),
                total: *submitted,
                message: format!("{} item(s) need a category", rejected.len()),
            },
            PipelineState::Complete { added } => PipelineProgress {
                phase: Some(Phase::Complete),
                current: *added,
                total: *added,
                message: format!("{} item(s) added to your wardrobe", added),
            },
            PipelineState::Failed {
                message,
                current,
                total,
            } => PipelineProgress {
                phase: Some(Phase::Failed),
                current: *current,
                total: *total,
                message: message.clone(),
            },
        }
    }
}

/// Compute the state after `step`, or `None` when the step is not valid from `state`.
pub fn next(state: &PipelineState, step: &Step) -> Option<PipelineState> {
    use PipelineState::*;

    match (state, step) {
        (_, Step::Reset) => Some(Idle),

        // A new run always starts from scratch, whatever came before
        (_, Step::Start { total }) if *total > 0 => Some(Uploading {
            current: 0,
            total: *total,
            succeeded: 0,
        }),

        (
            Uploading {
                current,
                total,
                succeeded,
            },
            Step::ItemAttempted {
                index,
                succeeded: ok,
            },
        ) if index == current && current < total => Some(Uploading {
            current: index + 1,
            total: *total,
            succeeded: succeeded + usize::from(*ok),
        }),

        (
            Uploading {
                current,
                total,
                succeeded,
            },
            Step::UploadsFinished,
        ) if current == total => {
            if *succeeded == 0 {
                Some(Failed {
                    message: AppError::AllUploadsFailed { attempted: *total }.to_string(),
                    current: *current,
                    total: *total,
                })
            } else {
                Some(Analyzing {
                    submitted: *succeeded,
                })
            }
        }

        (Analyzing { submitted }, Step::Classified(outcome)) => {
            match outcome.clone().normalized() {
                ClassificationOutcome::Accepted => Some(Complete { added: *submitted }),
                ClassificationOutcome::Rejected { urls } => Some(PendingManual {
                    submitted: *submitted,
                    rejected: urls,
                }),
            }
        }

        (PendingManual { submitted, .. }, Step::ManualAccepted) => {
            Some(Complete { added: *submitted })
        }

        (Uploading { .. } | Analyzing { .. } | PendingManual { .. }, Step::Fail { message }) => {
            let progress = state.progress();
            Some(Failed {
                message: message.clone(),
                current: progress.current,
                total: progress.total,
            })
        }

        _ => None,
    }
}
