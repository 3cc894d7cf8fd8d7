//! PipelineRunner - sequential per-subject stage execution

use std::path::PathBuf;

use chrono::Utc;
use contracts::{
    PathsConfig, PipelineBlueprint, PipelineError, PipelineParameters, PipelineRun, RunConfig,
    RunMode, SkipReason, StageFailure, StageRecord, StageSpec, StageStatus, SubjectId,
    ToolAdapter,
};
use stage_graph::StageGraph;
use tracing::{debug, error, info, instrument, warn};

use crate::abort::AbortSignal;
use crate::render::{check_parameters, render_invocation, RenderMode};
use crate::report::RunReport;
use crate::session::SubjectSession;

const ARTIFACT: &str = "artifact";
const TRANSFORM: &str = "transform";

/// How a stage that did not fail ended
enum Completion {
    AlreadyComplete,
    Executed,
}

/// One stage of a dry-run plan
#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub stage_id: contracts::StageId,
    /// Rendered command line
    pub command: String,
    pub outputs: Vec<PathBuf>,
    /// Every declared output is already present
    pub complete: bool,
}

/// Runs the validated stage list of a pipeline for one subject at a time
///
/// Stages execute strictly in declared order; a stage's tool exits before
/// the next stage's preconditions are checked. The runner holds no
/// per-subject state, so one instance can serve several subjects
/// concurrently.
pub struct PipelineRunner<A> {
    graph: StageGraph,
    paths: PathsConfig,
    parameters: PipelineParameters,
    options: RunConfig,
    adapter: A,
    abort: AbortSignal,
}

impl<A: ToolAdapter> PipelineRunner<A> {
    /// # Errors
    /// `Template` when an argument template references a parameter the
    /// configuration does not define.
    pub fn new(
        graph: StageGraph,
        blueprint: &PipelineBlueprint,
        adapter: A,
    ) -> Result<Self, PipelineError> {
        check_parameters(&graph, &blueprint.parameters)?;
        Ok(Self {
            graph,
            paths: blueprint.paths.clone(),
            parameters: blueprint.parameters.clone(),
            options: blueprint.run.clone(),
            adapter,
            abort: AbortSignal::new(),
        })
    }

    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.options.mode = mode;
        self
    }

    pub fn with_halt_on_failure(mut self, halt: bool) -> Self {
        self.options.halt_on_failure = halt;
        self
    }

    pub fn with_manifest(mut self, write: bool) -> Self {
        self.options.write_manifest = write;
        self
    }

    /// Share an externally owned abort signal
    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn options(&self) -> &RunConfig {
        &self.options
    }

    /// Run every stage for one subject
    ///
    /// Stage failures are recorded in the report, not returned.
    ///
    /// # Errors
    /// Only when the subject cannot be set up (invalid id, conflicting
    /// declarations).
    #[instrument(
        name = "pipeline_run",
        skip_all,
        fields(subject = %subject, mode = ?self.options.mode, adapter = self.adapter.name())
    )]
    pub async fn run_subject(&self, subject: SubjectId) -> Result<RunReport, PipelineError> {
        let mut session = SubjectSession::open(subject.clone(), &self.graph, &self.paths)?;
        let stages = self.graph.stages();
        let mut run = PipelineRun::new(
            subject,
            self.graph.version(),
            self.options.mode,
            stages.iter().map(|s| s.id.clone()),
        );

        let missing = session.missing_inputs(&self.graph);
        if !missing.is_empty() {
            warn!(missing = ?missing, "Some pipeline inputs are missing");
        }
        info!(stages = stages.len(), "Pipeline run started");

        let mut blocked: Vec<Option<SkipReason>> = vec![None; stages.len()];
        let mut executed = vec![false; stages.len()];
        let mut invocations = 0usize;

        for (idx, stage) in stages.iter().enumerate() {
            if self.abort.is_raised() {
                warn!(next = %stage.id, "Abort requested, skipping remaining stages");
                for record in &mut run.stages[idx..] {
                    skip(record, SkipReason::Aborted);
                }
                break;
            }

            let record = &mut run.stages[idx];
            if let Some(reason) = blocked[idx].take() {
                debug!(stage = %stage.id, reason = %reason, "Stage skipped");
                skip(record, reason);
                continue;
            }

            let upstream_executed = self
                .graph
                .dependencies(&stage.id)
                .iter()
                .filter_map(|id| self.graph.position(id))
                .any(|pos| executed[pos]);

            match self
                .execute_stage(stage, &mut session, record, upstream_executed, &mut invocations)
                .await
            {
                Ok(Completion::AlreadyComplete) => {
                    info!(stage = %stage.id, "Stage outputs already complete");
                    skip(record, SkipReason::AlreadyComplete);
                }
                Ok(Completion::Executed) => {
                    executed[idx] = true;
                    record.status = StageStatus::Succeeded;
                    record.finished_at = Some(Utc::now());
                    info!(
                        stage = %stage.id,
                        elapsed_ms = record.duration().map(|d| d.num_milliseconds()).unwrap_or_default(),
                        "Stage succeeded"
                    );
                }
                Err(err) => {
                    error!(stage = %stage.id, error = %err, "Stage failed");
                    record.status = StageStatus::Failed;
                    record.finished_at = Some(Utc::now());
                    record.failure = Some(StageFailure::from(&err));
                    if record.started_at.is_some() {
                        discard_outputs(stage, &mut session);
                    }
                    self.block_after_failure(idx, &mut blocked);
                }
            }
        }

        run.finished_at = Some(Utc::now());
        let mut report = RunReport {
            run,
            artifacts: session.store().artifacts().cloned().collect(),
            transforms: session.registry().transforms().cloned().collect(),
            invocations,
            manifest_path: None,
        };

        if self.options.write_manifest {
            let path = session.layout().manifest_path();
            match report.to_manifest().write(&path) {
                Ok(()) => report.manifest_path = Some(path),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to write run manifest"),
            }
        }

        if report.is_success() {
            info!(summary = %report, "Pipeline run finished");
        } else {
            warn!(summary = %report, "Pipeline run finished with failures");
        }
        Ok(report)
    }

    /// Render every stage without running anything
    ///
    /// Declared transforms are registered up front so chains resolve even
    /// before their producing stages ran.
    pub fn plan(&self, subject: SubjectId) -> Result<Vec<PlannedStage>, PipelineError> {
        let mut session = SubjectSession::open(subject, &self.graph, &self.paths)?;
        for stage in self.graph.stages() {
            session.register_transforms(stage, false)?;
        }

        let force = self.options.mode == RunMode::Force;
        let mut plan: Vec<PlannedStage> = Vec::with_capacity(self.graph.len());
        for stage in self.graph.stages() {
            let invocation =
                render_invocation(stage, &session, &self.parameters, RenderMode::Preview, true)?;
            let upstream_reruns = self
                .graph
                .dependencies(&stage.id)
                .iter()
                .filter_map(|id| self.graph.position(id))
                .any(|pos| !plan[pos].complete);
            let complete = !force && !upstream_reruns && outputs_complete(stage, &mut session);
            plan.push(PlannedStage {
                stage_id: stage.id.clone(),
                command: invocation.command_line(),
                outputs: invocation.outputs,
                complete,
            });
        }
        Ok(plan)
    }

    #[instrument(name = "stage", skip_all, fields(stage = %stage.id, program = %stage.command.program))]
    async fn execute_stage(
        &self,
        stage: &StageSpec,
        session: &mut SubjectSession,
        record: &mut StageRecord,
        upstream_executed: bool,
        invocations: &mut usize,
    ) -> Result<Completion, PipelineError> {
        if self.options.mode == RunMode::Resume
            && !upstream_executed
            && outputs_complete(stage, session)
        {
            session.register_transforms(stage, true)?;
            return Ok(Completion::AlreadyComplete);
        }

        check_preconditions(stage, session)?;

        record.status = StageStatus::Running;
        record.started_at = Some(Utc::now());

        let invocation =
            render_invocation(stage, session, &self.parameters, RenderMode::Execute, true)?;
        self.prepare_outputs(stage, session).await?;

        debug!(command = %invocation.command_line(), "Invoking tool");
        *invocations += 1;
        let output = self.adapter.invoke(&invocation).await?;
        if !output.success {
            return Err(PipelineError::ExternalToolFailure {
                stage: stage.id.to_string(),
                program: stage.command.program.clone(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }

        let store = session.store_mut();
        let missing: Vec<String> = stage
            .produced_artifact_names()
            .filter(|name| store.mark_valid(name).is_err())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::IncompleteStageOutput {
                stage: stage.id.to_string(),
                missing,
            });
        }

        session.register_transforms(stage, true)?;
        Ok(Completion::Executed)
    }

    /// Create output directories and drop stale state before a stage runs
    async fn prepare_outputs(
        &self,
        stage: &StageSpec,
        session: &mut SubjectSession,
    ) -> Result<(), PipelineError> {
        tokio::fs::create_dir_all(session.layout().modality_dir(stage.modality)).await?;

        let store = session.store_mut();
        for name in stage.produced_artifact_names() {
            if stage.idempotent {
                store.invalidate(name);
            } else if store.discard(name)? {
                debug!(artifact = %name, "Removed stale output of non-idempotent stage");
            }
        }
        Ok(())
    }

    /// Mark what a failure at `failed` prevents from running
    fn block_after_failure(&self, failed: usize, blocked: &mut [Option<SkipReason>]) {
        let failed_id = &self.graph.stages()[failed].id;
        for id in self.graph.transitive_dependents(failed_id) {
            if let Some(pos) = self.graph.position(id) {
                blocked[pos].get_or_insert_with(|| SkipReason::UpstreamFailed {
                    stage: failed_id.clone(),
                });
            }
        }
        if self.options.halt_on_failure {
            for slot in &mut blocked[failed + 1..] {
                slot.get_or_insert_with(|| SkipReason::RunHalted {
                    after: failed_id.clone(),
                });
            }
        }
    }
}

fn skip(record: &mut StageRecord, reason: SkipReason) {
    record.status = StageStatus::Skipped;
    record.skip_reason = Some(reason);
}

/// Resume probe: every declared output adopts as valid
fn outputs_complete(stage: &StageSpec, session: &mut SubjectSession) -> bool {
    let store = session.store_mut();
    let complete = stage
        .produced_artifact_names()
        .fold(true, |all, name| store.adopt(name) && all);
    if !complete {
        for name in stage.produced_artifact_names() {
            store.invalidate(name);
        }
    }
    complete
}

/// Remove whatever a failed stage left behind
///
/// An output is only valid once its stage finished cleanly, so files from a
/// failed attempt must not satisfy a later resume.
fn discard_outputs(stage: &StageSpec, session: &mut SubjectSession) {
    let store = session.store_mut();
    for name in stage.produced_artifact_names() {
        match store.discard(name) {
            Ok(true) => debug!(artifact = %name, "Removed output of failed stage"),
            Ok(false) => {}
            Err(e) => warn!(artifact = %name, error = %e, "Failed to remove output of failed stage"),
        }
    }
}

fn check_preconditions(stage: &StageSpec, session: &SubjectSession) -> Result<(), PipelineError> {
    let unsatisfied = |what: &'static str, name: &str| PipelineError::UnsatisfiedDependency {
        stage: stage.id.to_string(),
        what,
        name: name.to_string(),
    };
    if let Some(name) = stage
        .required_artifacts
        .iter()
        .find(|name| !session.store().exists(name))
    {
        return Err(unsatisfied(ARTIFACT, name.as_str()));
    }
    if let Some(name) = stage
        .required_transforms
        .iter()
        .find(|name| !session.registry().contains(name))
    {
        return Err(unsatisfied(TRANSFORM, name.as_str()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::arg::{input, lit, output};
    use contracts::{
        BidsDatatype, CoordinateSpace, FailureKind, Modality, PipelineDefinition, SourceDecl,
    };
    use std::path::Path;
    use tempfile::TempDir;
    use tool_adapter::MockToolAdapter;

    use CoordinateSpace::Native;

    /// a -> b -> c, plus d depending only on the raw input
    fn graph() -> StageGraph {
        let stage = |id: &str, from: &str, to: &str| {
            StageSpec::new(id, Modality::Anat, "tool")
                .requires(&[from])
                .produces(to, &format!("{to}.nii.gz"), Native)
                .args([input(from), output(to)])
                .force_flag("-force")
        };
        StageGraph::new(PipelineDefinition {
            version: "test".into(),
            sources: vec![SourceDecl::bids("raw", Native, BidsDatatype::Anat, "_T1w.nii.gz")],
            stages: vec![
                stage("a", "raw", "a_out"),
                stage("b", "a_out", "b_out"),
                stage("c", "b_out", "c_out").non_idempotent(),
                stage("d", "raw", "d_out"),
            ],
        })
        .unwrap()
    }

    fn blueprint(dir: &Path) -> PipelineBlueprint {
        let raw = dir.join("bids/sub-001/anat/sub-001_T1w.nii.gz");
        std::fs::create_dir_all(raw.parent().unwrap()).unwrap();
        std::fs::write(&raw, b"raw").unwrap();
        PipelineBlueprint {
            version: Default::default(),
            paths: PathsConfig {
                bids_root: dir.join("bids"),
                derivatives_root: dir.join("derivatives"),
                template_dir: dir.join("templates"),
            },
            inputs: Default::default(),
            templates: Default::default(),
            run: Default::default(),
            tools: Default::default(),
            parameters: Default::default(),
        }
    }

    fn runner(dir: &Path, adapter: MockToolAdapter) -> PipelineRunner<MockToolAdapter> {
        PipelineRunner::new(graph(), &blueprint(dir), adapter).unwrap()
    }

    fn statuses(report: &RunReport) -> Vec<StageStatus> {
        report.run.stages.iter().map(|r| r.status).collect()
    }

    #[tokio::test]
    async fn test_all_stages_succeed_in_order() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path(), MockToolAdapter::new());

        let report = runner.run_subject("sub-001".into()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(statuses(&report), vec![StageStatus::Succeeded; 4]);
        assert_eq!(runner.adapter().invoked_stages(), vec!["a", "b", "c", "d"]);
        assert_eq!(report.invocations, 4);
        assert!(report.valid_artifact("c_out").is_some());
        assert!(report.manifest_path.as_ref().unwrap().exists());

        // Every executed stage got its force flag
        assert!(runner
            .adapter()
            .invocations()
            .iter()
            .all(|inv| inv.args.last().map(String::as_str) == Some("-force")));
    }

    #[tokio::test]
    async fn test_resume_skips_completed_stages() {
        let dir = TempDir::new().unwrap();
        runner(dir.path(), MockToolAdapter::new())
            .run_subject("sub-001".into())
            .await
            .unwrap();

        let second = runner(dir.path(), MockToolAdapter::new());
        let report = second.run_subject("sub-001".into()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(second.adapter().invocation_count(), 0);
        assert!(report
            .run
            .stages
            .iter()
            .all(|r| r.skip_reason == Some(SkipReason::AlreadyComplete)));
    }

    #[tokio::test]
    async fn test_resume_reruns_downstream_of_rerun_stage() {
        let dir = TempDir::new().unwrap();
        let first = runner(dir.path(), MockToolAdapter::new());
        let report = first.run_subject("sub-001".into()).await.unwrap();
        std::fs::remove_file(&report.valid_artifact("a_out").unwrap().path).unwrap();

        let second = runner(dir.path(), MockToolAdapter::new());
        second.run_subject("sub-001".into()).await.unwrap();
        assert_eq!(second.adapter().invoked_stages(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_resume_reruns_stage_that_failed_last_time() {
        let dir = TempDir::new().unwrap();
        let report = runner(dir.path(), MockToolAdapter::new())
            .run_subject("sub-001".into())
            .await
            .unwrap();
        let b_out = report.valid_artifact("b_out").unwrap().path.clone();

        // Idempotent stage: its earlier output stays in place while the tool runs
        let forced = runner(dir.path(), MockToolAdapter::new().fail_stage("b", 1, "crash"))
            .with_mode(RunMode::Force);
        let report = forced.run_subject("sub-001".into()).await.unwrap();
        assert_eq!(report.run.status_of("b"), Some(StageStatus::Failed));
        assert!(!b_out.exists());

        let resumed = runner(dir.path(), MockToolAdapter::new());
        let report = resumed.run_subject("sub-001".into()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(resumed.adapter().invoked_stages(), vec!["b", "c"]);
        assert_eq!(report.run.status_of("b"), Some(StageStatus::Succeeded));
    }

    #[tokio::test]
    async fn test_force_mode_reruns_everything() {
        let dir = TempDir::new().unwrap();
        runner(dir.path(), MockToolAdapter::new())
            .run_subject("sub-001".into())
            .await
            .unwrap();

        let forced = runner(dir.path(), MockToolAdapter::new()).with_mode(RunMode::Force);
        let report = forced.run_subject("sub-001".into()).await.unwrap();
        assert_eq!(statuses(&report), vec![StageStatus::Succeeded; 4]);
        assert_eq!(forced.adapter().invocation_count(), 4);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_and_halts() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path(), MockToolAdapter::new().fail_stage("a", 1, "boom"));

        let report = runner.run_subject("sub-001".into()).await.unwrap();
        assert_eq!(
            statuses(&report),
            vec![
                StageStatus::Failed,
                StageStatus::Skipped,
                StageStatus::Skipped,
                StageStatus::Skipped
            ]
        );
        let failure = report.run.stages[0].failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::ExternalToolFailure);
        assert_eq!(failure.diagnostic.as_deref(), Some("boom"));
        assert_eq!(
            report.run.stages[1].skip_reason,
            Some(SkipReason::UpstreamFailed { stage: "a".into() })
        );
        assert_eq!(
            report.run.stages[3].skip_reason,
            Some(SkipReason::RunHalted { after: "a".into() })
        );
        assert_eq!(runner.adapter().invoked_stages(), vec!["a"]);
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_keep_going_runs_independent_stages() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path(), MockToolAdapter::new().fail_stage("b", 2, ""))
            .with_halt_on_failure(false);

        let report = runner.run_subject("sub-001".into()).await.unwrap();
        assert_eq!(
            statuses(&report),
            vec![
                StageStatus::Succeeded,
                StageStatus::Failed,
                StageStatus::Skipped,
                StageStatus::Succeeded
            ]
        );
        assert_eq!(runner.adapter().invoked_stages(), vec!["a", "b", "d"]);
        // Empty stderr is not kept as a diagnostic
        assert!(report.run.stages[1].failure.as_ref().unwrap().diagnostic.is_none());
    }

    #[tokio::test]
    async fn test_empty_output_is_incomplete() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path(), MockToolAdapter::new().empty_outputs("a"));

        let report = runner.run_subject("sub-001".into()).await.unwrap();
        let failure = report.run.stages[0].failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::IncompleteStageOutput);
        assert!(report.valid_artifact("a_out").is_none());
    }

    #[tokio::test]
    async fn test_missing_input_is_unsatisfied_dependency() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path(), MockToolAdapter::new()).with_halt_on_failure(false);
        std::fs::remove_file(dir.path().join("bids/sub-001/anat/sub-001_T1w.nii.gz")).unwrap();

        let report = runner.run_subject("sub-001".into()).await.unwrap();
        let failure = report.run.stages[0].failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::UnsatisfiedDependency);
        assert!(report.run.stages[0].started_at.is_none());
        assert_eq!(runner.adapter().invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_launch_failure_is_tool_failure() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path(), MockToolAdapter::new().launch_error("a"));
        let report = runner.run_subject("sub-001".into()).await.unwrap();
        let failure = report.run.stages[0].failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::ExternalToolFailure);
    }

    #[tokio::test]
    async fn test_abort_between_stages() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path(), MockToolAdapter::new());
        runner.abort_signal().raise();

        let report = runner.run_subject("sub-001".into()).await.unwrap();
        assert!(report.run.was_aborted());
        assert_eq!(report.exit_code(), crate::report::EXIT_ABORTED);
        assert_eq!(runner.adapter().invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_non_idempotent_outputs_removed_before_rerun() {
        let dir = TempDir::new().unwrap();
        let first = runner(dir.path(), MockToolAdapter::new());
        let report = first.run_subject("sub-001".into()).await.unwrap();
        let c_out = report.valid_artifact("c_out").unwrap().path.clone();

        // Tool "succeeds" without writing: the stale file must not satisfy the stage
        let second = runner(dir.path(), MockToolAdapter::new().no_outputs("c"))
            .with_mode(RunMode::Force);
        let report = second.run_subject("sub-001".into()).await.unwrap();
        assert!(!c_out.exists());
        assert_eq!(report.run.status_of("c"), Some(StageStatus::Failed));
    }

    #[test]
    fn test_plan_renders_without_running() {
        let dir = TempDir::new().unwrap();
        let runner = runner(dir.path(), MockToolAdapter::new());
        let plan = runner.plan("sub-001".into()).unwrap();
        assert_eq!(plan.len(), 4);
        assert!(plan.iter().all(|p| !p.complete));
        assert!(plan[0].command.starts_with("tool "));
        assert!(plan[0].command.ends_with(" -force"));
        assert_eq!(runner.adapter().invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_plan_matches_resume_run() {
        let dir = TempDir::new().unwrap();
        let first = runner(dir.path(), MockToolAdapter::new());
        let report = first.run_subject("sub-001".into()).await.unwrap();
        std::fs::remove_file(&report.valid_artifact("a_out").unwrap().path).unwrap();

        let second = runner(dir.path(), MockToolAdapter::new());
        let planned: Vec<_> = second
            .plan("sub-001".into())
            .unwrap()
            .into_iter()
            .filter(|p| !p.complete)
            .map(|p| p.stage_id)
            .collect();
        assert_eq!(planned, vec!["a", "b", "c"]);

        second.run_subject("sub-001".into()).await.unwrap();
        assert_eq!(second.adapter().invoked_stages(), planned);
    }

    #[test]
    fn test_unknown_parameter_fails_construction() {
        let dir = TempDir::new().unwrap();
        let stage = StageSpec::new("x", Modality::Anat, "tool")
            .requires(&["raw"])
            .produces("x_out", "x.nii.gz", Native)
            .args([input("raw"), lit("-p"), contracts::arg::param("nope.nothing"), output("x_out")]);
        let graph = StageGraph::new(PipelineDefinition {
            version: "test".into(),
            sources: vec![SourceDecl::bids("raw", Native, BidsDatatype::Anat, "_T1w.nii.gz")],
            stages: vec![stage],
        })
        .unwrap();
        let result = PipelineRunner::new(graph, &blueprint(dir.path()), MockToolAdapter::new());
        assert!(matches!(result, Err(PipelineError::Template { .. })));
    }
}
