use thiserror::Error;

use crate::state_machine::{TaskState, Trigger};

/// Errors raised while turning the submission form into a job descriptor.
///
/// None of these ever reach the worker boundary.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No output folder selected. Please choose where the results should be written.")]
    OutputNotSelected,

    #[error("No {0} folder selected. Please choose the input folders for this task.")]
    PathNotSelected(&'static str),

    #[error("Invalid task selected: {0:?}")]
    InvalidTask(String),

    #[error("Failed to search images under {path}: {message}")]
    Discovery { path: String, message: String },
}

impl ValidationError {
    /// Stable notification title, mirrored in the console log.
    pub fn title(&self) -> &'static str {
        match self {
            ValidationError::OutputNotSelected => "OUTPUT_NOT_SELECTED",
            ValidationError::PathNotSelected(_) => "PATH_NOT_SELECTED",
            ValidationError::InvalidTask(_) => "INVALID_TASK",
            ValidationError::Discovery { .. } => "DISCOVERY_FAILED",
        }
    }

    /// Whether the operator can fix this by changing the form.
    ///
    /// `InvalidTask` is an internal invariant violation and is never
    /// surfaced as a notification.
    pub fn is_user_recoverable(&self) -> bool {
        !matches!(self, ValidationError::InvalidTask(_))
    }
}

#[derive(Debug, Error)]
pub enum PhotolinkError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("A job is already in progress ({0}). Stop it before starting another one.")]
    JobAlreadyRunning(TaskState),

    #[error("{pending} worker(s) did not acknowledge the stop request within {timeout_ms}ms")]
    StopTimeout { pending: usize, timeout_ms: u64 },

    #[error("Invalid state transition: {trigger:?} while {state}")]
    InvalidTransition { state: TaskState, trigger: Trigger },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T, E = PhotolinkError> = std::result::Result<T, E>;
