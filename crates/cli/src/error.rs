//! Error types for CLI operations.

use contracts::PipelineError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// `--until` names a stage the pipeline does not declare
    #[error("Unknown stage '{stage}'")]
    UnknownStage { stage: String },

    /// No subject to process
    #[error("No subjects found under {root}")]
    NoSubjects { root: String },

    /// Configuration, graph or bookkeeping error
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn unknown_stage(stage: impl Into<String>) -> Self {
        Self::UnknownStage {
            stage: stage.into(),
        }
    }

    pub fn no_subjects(root: impl Into<String>) -> Self {
        Self::NoSubjects { root: root.into() }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
