//! Layered error definitions
//!
//! Categorized by source: config / graph validation / bookkeeping / execution

use std::path::PathBuf;

use thiserror::Error;

use crate::CoordinateSpace;

/// Unified error type
#[derive(Debug, Error)]
pub enum PipelineError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Stage Graph Errors =====
    /// Two stages share one id
    #[error("duplicate stage id '{stage}'")]
    DuplicateStage { stage: String },

    /// An artifact or transform name is produced by more than one producer
    #[error("{what} '{name}' is produced by both '{first}' and '{second}'")]
    DuplicateProducer {
        what: &'static str,
        name: String,
        first: String,
        second: String,
    },

    /// A requirement that nothing in the pipeline produces
    #[error("stage '{stage}' requires {what} '{name}' which no stage or input produces")]
    UnknownDependency {
        stage: String,
        what: &'static str,
        name: String,
    },

    /// A requirement produced by a later (or the same) stage
    #[error("stage '{stage}' requires {what} '{name}' which is only produced later by '{producer}'")]
    ForwardReference {
        stage: String,
        what: &'static str,
        name: String,
        producer: String,
    },

    /// The stage dependency graph contains a cycle
    #[error("dependency cycle between stages: {}", stages.join(" -> "))]
    DependencyCycle { stages: Vec<String> },

    /// Structurally inconsistent stage declaration
    #[error("invalid stage '{stage}': {message}")]
    InvalidStage { stage: String, message: String },

    // ===== Artifact / Transform Bookkeeping Errors =====
    /// `mark_valid` on a name that was never registered
    #[error("artifact not registered: {name}")]
    ArtifactNotRegistered { name: String },

    /// `get` on an artifact that is not (yet) valid
    #[error("artifact missing or not yet valid: {name}")]
    ArtifactMissing { name: String },

    /// The producing stage did not leave a usable file behind
    #[error("artifact '{name}' was not produced at {}: {reason}", path.display())]
    ArtifactProductionFailed {
        name: String,
        path: PathBuf,
        reason: String,
    },

    /// A producer tried to claim another producer's artifact
    #[error("artifact '{name}' belongs to '{owner}', refusing registration by '{claimant}'")]
    ArtifactConflict {
        name: String,
        owner: String,
        claimant: String,
    },

    /// Lookup of an unknown transform
    #[error("transform not registered: {name}")]
    TransformNotRegistered { name: String },

    /// Transform registered twice under one name
    #[error("transform '{name}' is already registered")]
    TransformConflict { name: String },

    /// No chain of transforms connects the two spaces
    #[error("no transform path from {from} to {to}")]
    NoTransformPath {
        from: CoordinateSpace,
        to: CoordinateSpace,
    },

    /// Transform parameter file could not be read
    #[error("cannot read transform file {}: {message}", path.display())]
    TransformFile { path: PathBuf, message: String },

    /// A transform chain whose entries do not chain spaces
    #[error("invalid transform chain: {message}")]
    InvalidTransformChain { message: String },

    // ===== Execution Errors =====
    /// Stage precondition not met; the tool is never started
    #[error("stage '{stage}' has unsatisfied dependency {what} '{name}'")]
    UnsatisfiedDependency {
        stage: String,
        what: &'static str,
        name: String,
    },

    /// The external tool exited unsuccessfully
    #[error("stage '{stage}': {program} exited with {}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ExternalToolFailure {
        stage: String,
        program: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Tool exited zero but left declared outputs missing or empty
    #[error("stage '{stage}' finished without producing: {}", missing.join(", "))]
    IncompleteStageOutput { stage: String, missing: Vec<String> },

    /// The external program could not be started at all
    #[error("failed to launch '{program}': {message}")]
    ToolLaunch { program: String, message: String },

    /// Argument template could not be rendered
    #[error("stage '{stage}' argument '{token}': {message}")]
    Template {
        stage: String,
        token: String,
        message: String,
    },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create invalid stage error
    pub fn invalid_stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidStage {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Create artifact production error
    pub fn production_failed(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ArtifactProductionFailed {
            name: name.into(),
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create transform file error
    pub fn transform_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::TransformFile {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create template rendering error
    pub fn template(
        stage: impl Into<String>,
        token: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Template {
            stage: stage.into(),
            token: token.into(),
            message: message.into(),
        }
    }

    /// Create tool launch error
    pub fn tool_launch(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolLaunch {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Whether this error comes from loading the configuration
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigParse { .. } | Self::ConfigValidation { .. })
    }

    /// Whether this error comes from pipeline-definition validation
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateStage { .. }
                | Self::DuplicateProducer { .. }
                | Self::UnknownDependency { .. }
                | Self::ForwardReference { .. }
                | Self::DependencyCycle { .. }
                | Self::InvalidStage { .. }
        )
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, PipelineError>;
