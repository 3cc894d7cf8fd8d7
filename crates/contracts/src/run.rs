//! PipelineRun - execution record of one subject run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{PipelineError, StageId, SubjectId};

/// How already-present outputs are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Skip stages whose outputs already exist and validate
    #[default]
    Resume,
    /// Run every stage; each tool overwrites its own outputs
    Force,
}

/// Per-stage state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure category of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A required artifact or transform was missing; the tool never ran
    UnsatisfiedDependency,
    /// The tool exited unsuccessfully or could not be launched
    ExternalToolFailure,
    /// The tool exited zero but left declared outputs missing or empty
    IncompleteStageOutput,
    /// Store/registry inconsistency (path resolution, transform chain, ...)
    Bookkeeping,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UnsatisfiedDependency => "UnsatisfiedDependency",
            Self::ExternalToolFailure => "ExternalToolFailure",
            Self::IncompleteStageOutput => "IncompleteStageOutput",
            Self::Bookkeeping => "Bookkeeping",
        };
        f.write_str(s)
    }
}

/// Why a stage failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    pub kind: FailureKind,

    /// Stage-scoped, human readable summary
    pub message: String,

    /// Raw tool output (stderr) for debugging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl From<&PipelineError> for StageFailure {
    fn from(err: &PipelineError) -> Self {
        let (kind, diagnostic) = match err {
            PipelineError::UnsatisfiedDependency { .. } => (FailureKind::UnsatisfiedDependency, None),
            PipelineError::ExternalToolFailure { stderr, .. } => {
                (FailureKind::ExternalToolFailure, Some(stderr.clone()).filter(|s| !s.is_empty()))
            }
            PipelineError::ToolLaunch { .. } => (FailureKind::ExternalToolFailure, None),
            PipelineError::IncompleteStageOutput { .. } => (FailureKind::IncompleteStageOutput, None),
            _ => (FailureKind::Bookkeeping, None),
        };
        Self {
            kind,
            message: err.to_string(),
            diagnostic,
        }
    }
}

/// Why a stage was not executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum SkipReason {
    /// Resume mode found every declared output present and valid
    AlreadyComplete,
    /// Depends (directly or transitively) on a failed stage
    UpstreamFailed { stage: StageId },
    /// An unrelated stage failed and the run halts on failure
    RunHalted { after: StageId },
    /// Abort requested between stages
    Aborted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyComplete => f.write_str("outputs already complete"),
            Self::UpstreamFailed { stage } => write!(f, "never attempted: depends on failed stage '{stage}'"),
            Self::RunHalted { after } => write!(f, "never attempted: run halted after '{after}' failed"),
            Self::Aborted => f.write_str("never attempted: run aborted"),
        }
    }
}

/// Execution record of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage_id: StageId,
    pub status: StageStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
}

impl StageRecord {
    pub fn pending(stage_id: StageId) -> Self {
        Self {
            stage_id,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            failure: None,
            skip_reason: None,
        }
    }

    /// Wall time between start and finish
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// Ordered stage outcomes of one subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub subject: SubjectId,
    pub pipeline_version: String,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    pub stages: Vec<StageRecord>,
}

impl PipelineRun {
    pub fn new(
        subject: SubjectId,
        pipeline_version: impl Into<String>,
        mode: RunMode,
        stage_ids: impl IntoIterator<Item = StageId>,
    ) -> Self {
        Self {
            subject,
            pipeline_version: pipeline_version.into(),
            mode,
            started_at: Utc::now(),
            finished_at: None,
            stages: stage_ids.into_iter().map(StageRecord::pending).collect(),
        }
    }

    pub fn record(&self, stage_id: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.stage_id == stage_id)
    }

    pub fn record_mut(&mut self, stage_id: &str) -> Option<&mut StageRecord> {
        self.stages.iter_mut().find(|r| r.stage_id == stage_id)
    }

    pub fn status_of(&self, stage_id: &str) -> Option<StageStatus> {
        self.record(stage_id).map(|r| r.status)
    }

    pub fn count(&self, status: StageStatus) -> usize {
        self.stages.iter().filter(|r| r.status == status).count()
    }

    /// First failed stage, in execution order
    pub fn first_failure(&self) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.status == StageStatus::Failed)
    }

    /// True when no stage failed and none was skipped for a reason other than completion
    pub fn is_success(&self) -> bool {
        self.stages.iter().all(|r| match r.status {
            StageStatus::Succeeded => true,
            StageStatus::Skipped => r.skip_reason == Some(SkipReason::AlreadyComplete),
            _ => false,
        })
    }

    pub fn was_aborted(&self) -> bool {
        self.stages
            .iter()
            .any(|r| r.skip_reason == Some(SkipReason::Aborted))
    }
}
