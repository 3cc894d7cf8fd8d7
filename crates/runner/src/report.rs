//! RunReport - outcome of one subject run

use std::fmt;
use std::fmt::Write as _;
use std::path::PathBuf;

use artifact_store::RunManifest;
use contracts::{Artifact, PipelineRun, SkipReason, StageStatus, SubjectId, Transform};

/// Exit code of a run stopped by an abort request (128 + SIGINT)
pub const EXIT_ABORTED: i32 = 130;

/// Stage records plus the final bookkeeping state of one subject
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run: PipelineRun,

    /// Every registered artifact, valid or not, in registration order
    pub artifacts: Vec<Artifact>,

    pub transforms: Vec<Transform>,

    /// Number of tool invocations made
    pub invocations: usize,

    /// Where the manifest was written, if it was
    pub manifest_path: Option<PathBuf>,
}

impl RunReport {
    pub fn subject(&self) -> &SubjectId {
        &self.run.subject
    }

    pub fn is_success(&self) -> bool {
        self.run.is_success()
    }

    /// 0 on success, [`EXIT_ABORTED`] when aborted, 1 on any other failure
    pub fn exit_code(&self) -> i32 {
        if self.run.was_aborted() {
            EXIT_ABORTED
        } else if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn valid_artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name && a.valid)
    }

    pub fn to_manifest(&self) -> RunManifest {
        RunManifest {
            run: self.run.clone(),
            artifacts: self.artifacts.clone(),
            transforms: self.transforms.clone(),
        }
    }

    /// Stage-scoped description of every failure and what it prevented
    ///
    /// `None` when no stage failed.
    pub fn failure_report(&self) -> Option<String> {
        let failed: Vec<_> = self
            .run
            .stages
            .iter()
            .filter(|r| r.status == StageStatus::Failed)
            .collect();
        if failed.is_empty() {
            return None;
        }

        let mut out = String::new();
        for record in failed {
            let _ = writeln!(out, "{}: stage '{}' failed", self.run.subject, record.stage_id);
            if let Some(failure) = &record.failure {
                let _ = writeln!(out, "  condition: {}", failure.kind);
                let _ = writeln!(out, "  message:   {}", failure.message);
                if let Some(diagnostic) = &failure.diagnostic {
                    let _ = writeln!(out, "  stderr:");
                    for line in diagnostic.lines() {
                        let _ = writeln!(out, "    {line}");
                    }
                }
            }
            let downstream = self.skipped(|reason| {
                matches!(reason, SkipReason::UpstreamFailed { stage } if *stage == record.stage_id)
            });
            if !downstream.is_empty() {
                let _ = writeln!(out, "  skipped downstream: {}", downstream.join(", "));
            }
        }

        let halted = self.skipped(|reason| matches!(reason, SkipReason::RunHalted { .. }));
        if !halted.is_empty() {
            let _ = writeln!(out, "  not attempted (run halted): {}", halted.join(", "));
        }
        let aborted = self.skipped(|reason| *reason == SkipReason::Aborted);
        if !aborted.is_empty() {
            let _ = writeln!(out, "  not attempted (aborted): {}", aborted.join(", "));
        }
        Some(out)
    }

    fn skipped(&self, filter: impl Fn(&SkipReason) -> bool) -> Vec<&str> {
        self.run
            .stages
            .iter()
            .filter(|r| r.skip_reason.as_ref().is_some_and(&filter))
            .map(|r| r.stage_id.as_str())
            .collect()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = self
            .run
            .finished_at
            .map(|end| (end - self.run.started_at).num_milliseconds() as f64 / 1000.0)
            .unwrap_or_default();
        write!(
            f,
            "{}: {} succeeded, {} skipped, {} failed, {} tool calls ({:.1}s)",
            self.run.subject,
            self.run.count(StageStatus::Succeeded),
            self.run.count(StageStatus::Skipped),
            self.run.count(StageStatus::Failed),
            self.invocations,
            elapsed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{FailureKind, PipelineError, RunMode, StageFailure, StageId};

    fn report() -> RunReport {
        let ids = ["n4", "bet", "mni", "seg", "dwi"];
        let mut run = PipelineRun::new(
            "sub-001".into(),
            "v1",
            RunMode::Resume,
            ids.iter().map(|s| StageId::from(*s)),
        );
        run.stages[0].status = StageStatus::Succeeded;
        run.stages[1].status = StageStatus::Failed;
        run.stages[1].failure = Some(StageFailure::from(&PipelineError::ExternalToolFailure {
            stage: "bet".into(),
            program: "antsBrainExtraction.sh".into(),
            exit_code: Some(1),
            stderr: "Exception caught\nat line 3".into(),
        }));
        for idx in [2, 3] {
            run.stages[idx].status = StageStatus::Skipped;
            run.stages[idx].skip_reason = Some(SkipReason::UpstreamFailed { stage: "bet".into() });
        }
        run.stages[4].status = StageStatus::Skipped;
        run.stages[4].skip_reason = Some(SkipReason::RunHalted { after: "bet".into() });
        RunReport {
            run,
            artifacts: vec![],
            transforms: vec![],
            invocations: 2,
            manifest_path: None,
        }
    }

    #[test]
    fn test_failure_report_names_stage_condition_and_skips() {
        let report = report();
        assert_eq!(report.exit_code(), 1);
        let text = report.failure_report().unwrap();
        assert!(text.contains("stage 'bet' failed"));
        assert!(text.contains(&FailureKind::ExternalToolFailure.to_string()));
        assert!(text.contains("    Exception caught\n    at line 3"));
        assert!(text.contains("skipped downstream: mni, seg"));
        assert!(text.contains("not attempted (run halted): dwi"));
    }

    #[test]
    fn test_success_has_no_failure_report() {
        let mut report = report();
        for record in &mut report.run.stages {
            record.status = StageStatus::Succeeded;
            record.failure = None;
            record.skip_reason = None;
        }
        assert!(report.failure_report().is_none());
        assert_eq!(report.exit_code(), 0);
        assert!(report.to_string().starts_with("sub-001: 5 succeeded, 0 skipped, 0 failed"));
    }

    #[test]
    fn test_aborted_exit_code() {
        let mut report = report();
        report.run.stages[4].skip_reason = Some(SkipReason::Aborted);
        assert_eq!(report.exit_code(), EXIT_ABORTED);
    }
}
