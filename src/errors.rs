use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {message}")]
    Input { message: String },

    #[error("Not signed in: {message}. Please log in again.")]
    Auth { message: String },

    #[error("Upload failed: {reason}")]
    UploadFailed { reason: String },

    #[error("All {attempted} uploads failed")]
    AllUploadsFailed { attempted: usize },

    #[error("Classification failed: {reason}")]
    Classification { reason: String },

    #[error("Manual classification failed: {reason}")]
    ManualClassification { reason: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upload run {run_id} was abandoned")]
    RunAbandoned { run_id: String },

    #[error("Invalid pipeline transition: {step} in {state}")]
    InvalidTransition { step: String, state: String },
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn input(message: &str) -> Self {
        Self::Input {
            message: message.to_string(),
        }
    }

    pub fn auth(message: &str) -> Self {
        Self::Auth {
            message: message.to_string(),
        }
    }

    pub fn upload_failed(reason: impl Into<String>) -> Self {
        Self::UploadFailed {
            reason: reason.into(),
        }
    }

    pub fn classification(reason: impl Into<String>) -> Self {
        Self::Classification {
            reason: reason.into(),
        }
    }

    pub fn manual_classification(reason: impl Into<String>) -> Self {
        Self::ManualClassification {
            reason: reason.into(),
        }
    }

    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn run_abandoned(run_id: &str) -> Self {
        Self::RunAbandoned {
            run_id: run_id.to_string(),
        }
    }

    pub fn invalid_transition(step: &str, state: &str) -> Self {
        Self::InvalidTransition {
            step: step.to_string(),
            state: state.to_string(),
        }
    }

    /// Errors raised before any network traffic, caused by how the pipeline was called.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AppError::Input { .. } | AppError::Auth { .. } | AppError::Validation { .. }
        )
    }

    /// Errors that move a run into the failed phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppError::AllUploadsFailed { .. }
                | AppError::Classification { .. }
                | AppError::ManualClassification { .. }
        )
    }
}
