//! # Integration Tests
//!
//! End-to-end runs of the connectome pipeline against a scratch BIDS
//! dataset, with every external tool replaced by the mock adapter.

#[cfg(test)]
mod fixtures {
    use std::fs;
    use std::path::Path;

    use artifact_store::SubjectLayout;
    use config_loader::{ConfigFormat, ConfigLoader, PipelineBlueprint};
    use contracts::SubjectId;
    use stage_graph::{connectome, StageGraph};
    use tempfile::TempDir;

    /// Scratch dataset with raw inputs and templates on disk
    pub struct Dataset {
        pub dir: TempDir,
        pub blueprint: PipelineBlueprint,
    }

    pub fn config_toml(root: &Path) -> String {
        format!(
            r#"
version = "v1"

[paths]
bids_root = "{root}/bids"
derivatives_root = "{root}/derivatives"
template_dir = "{root}/templates"

[run]
mode = "resume"
halt_on_failure = true
write_manifest = true

[tools.env]
OMP_NUM_THREADS = "1"
"#,
            root = root.display()
        )
    }

    pub fn dataset(subjects: &[&str]) -> Dataset {
        let dir = TempDir::new().unwrap();
        let blueprint =
            ConfigLoader::load_from_str(&config_toml(dir.path()), ConfigFormat::Toml).unwrap();
        for subject in subjects {
            write_inputs(&blueprint, subject);
        }
        Dataset { dir, blueprint }
    }

    /// Create every raw input and template file for `subject`
    pub fn write_inputs(blueprint: &PipelineBlueprint, subject: &str) {
        let layout = SubjectLayout::new(SubjectId::from(subject), &blueprint.paths).unwrap();
        for source in connectome::sources(blueprint) {
            let path = layout.source_path(&source);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("{} of {subject}\n", source.name)).unwrap();
        }
    }

    pub fn full_graph(blueprint: &PipelineBlueprint) -> StageGraph {
        StageGraph::new(connectome::definition(blueprint)).unwrap()
    }

    /// The anatomical prefix: bias correction through atlas warping
    pub fn anatomical_graph(blueprint: &PipelineBlueprint) -> StageGraph {
        full_graph(blueprint).through("atlas_to_native").unwrap()
    }

    pub const ANATOMICAL_STAGES: [&str; 5] = [
        "t1w_bias_correction",
        "t1w_brain_extraction",
        "mni_normalization",
        "tissue_segmentation",
        "atlas_to_native",
    ];
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::BTreeSet;

    use artifact_store::RunManifest;
    use contracts::{
        FailureKind, Producer, RunMode, SkipReason, StageStatus, SubjectId,
    };
    use contracts::CoordinateSpace::{Mni, Native};
    use runner::PipelineRunner;
    use tool_adapter::MockToolAdapter;
    use transform_registry::TransformRegistry;

    use crate::fixtures::*;

    /// Brain extraction crashes: everything after it is skipped, nothing
    /// downstream is invoked, and the failure is reported against the stage.
    #[tokio::test]
    async fn test_brain_extraction_failure_skips_downstream() {
        let data = dataset(&["sub-001"]);
        let bias_only = anatomical_graph(&data.blueprint)
            .through("t1w_bias_correction")
            .unwrap();
        let first = PipelineRunner::new(bias_only, &data.blueprint, MockToolAdapter::new())
            .unwrap()
            .run_subject("sub-001".into())
            .await
            .unwrap();
        assert!(first.is_success());

        let adapter = MockToolAdapter::new().fail_stage(
            "t1w_brain_extraction",
            1,
            "antsBrainExtraction.sh: registration did not converge",
        );
        let runner =
            PipelineRunner::new(anatomical_graph(&data.blueprint), &data.blueprint, adapter)
                .unwrap();

        let report = runner.run_subject("sub-001".into()).await.unwrap();
        let run = &report.run;

        let n4 = run.record("t1w_bias_correction").unwrap();
        assert_eq!(n4.status, StageStatus::Skipped);
        assert_eq!(n4.skip_reason, Some(SkipReason::AlreadyComplete));
        assert_eq!(run.status_of("t1w_brain_extraction"), Some(StageStatus::Failed));
        let failure = run
            .record("t1w_brain_extraction")
            .and_then(|r| r.failure.as_ref())
            .unwrap();
        assert_eq!(failure.kind, FailureKind::ExternalToolFailure);
        assert!(failure
            .diagnostic
            .as_deref()
            .unwrap()
            .contains("did not converge"));

        for stage in ["mni_normalization", "tissue_segmentation", "atlas_to_native"] {
            let record = run.record(stage).unwrap();
            assert_eq!(record.status, StageStatus::Skipped, "{stage}");
            assert_eq!(
                record.skip_reason,
                Some(SkipReason::UpstreamFailed {
                    stage: "t1w_brain_extraction".into()
                })
            );
            assert!(record.started_at.is_none());
        }

        assert_eq!(runner.adapter().invoked_stages(), vec!["t1w_brain_extraction"]);
        assert!(!report.is_success());
        assert_eq!(report.exit_code(), 1);

        let text = report.failure_report().unwrap();
        assert!(text.contains("stage 't1w_brain_extraction' failed"));
        assert!(text.contains("mni_normalization"));
    }

    /// A clean anatomical run leaves exactly the declared outputs, all valid
    #[tokio::test]
    async fn test_anatomical_prefix_produces_declared_outputs() {
        let data = dataset(&["sub-001"]);
        let graph = anatomical_graph(&data.blueprint);
        let declared: BTreeSet<String> = graph
            .stages()
            .iter()
            .flat_map(|s| s.produced_artifact_names().map(ToString::to_string))
            .collect();
        let runner =
            PipelineRunner::new(graph, &data.blueprint, MockToolAdapter::new()).unwrap();

        let report = runner.run_subject("sub-001".into()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.exit_code(), 0);
        let order: Vec<_> = report.run.stages.iter().map(|r| r.stage_id.to_string()).collect();
        assert_eq!(order, ANATOMICAL_STAGES);
        assert_eq!(report.run.count(StageStatus::Succeeded), 5);
        assert_eq!(report.invocations, 5);

        let derived: BTreeSet<String> = report
            .artifacts
            .iter()
            .filter(|a| a.produced_by != Producer::Input)
            .map(|a| {
                assert!(a.valid, "{} not valid", a.name);
                assert!(a.path.starts_with(data.dir.path().join("derivatives/sub-001")));
                a.name.to_string()
            })
            .collect();
        assert_eq!(derived, declared);

        let transforms: BTreeSet<String> =
            report.transforms.iter().map(|t| t.name.to_string()).collect();
        assert!(transforms.contains("native_to_mni_affine"));
        assert!(transforms.contains("native_to_mni_warp"));

        // The atlas is pulled back from template space through the inverted affine
        let affine = report.valid_artifact("mni_affine_file").unwrap().path.clone();
        let atlas_call = runner
            .adapter()
            .invocations()
            .into_iter()
            .find(|inv| inv.stage_id == "atlas_to_native")
            .unwrap();
        assert!(atlas_call
            .command_line()
            .contains(&format!("[{},1]", affine.display())));

        let manifest = RunManifest::read(report.manifest_path.as_ref().unwrap()).unwrap();
        assert_eq!(manifest.run.stages.len(), 5);
        assert_eq!(manifest.run.subject, SubjectId::from("sub-001"));
    }

    /// Transforms announced by the run resolve into chains both ways
    #[tokio::test]
    async fn test_registered_transforms_resolve_between_spaces() {
        let data = dataset(&["sub-001"]);
        let runner = PipelineRunner::new(
            anatomical_graph(&data.blueprint),
            &data.blueprint,
            MockToolAdapter::new(),
        )
        .unwrap();
        let report = runner.run_subject("sub-001".into()).await.unwrap();
        assert!(report.is_success());

        let mut registry = TransformRegistry::new();
        for transform in &report.transforms {
            registry.insert(transform.clone()).unwrap();
        }
        let affine = report.valid_artifact("mni_affine_file").unwrap().path.clone();
        let warp = report.valid_artifact("mni_warp_file").unwrap().path.clone();
        let inverse_warp = report
            .valid_artifact("mni_inverse_warp_file")
            .unwrap()
            .path
            .clone();

        let to_mni = registry.resolve(Native, Mni).unwrap();
        assert_eq!(to_mni.len(), 2);
        assert!(to_mni.files().all(|f| f.exists()));
        assert_eq!(
            to_mni.ants_args(),
            vec![
                "-t".to_string(),
                warp.display().to_string(),
                "-t".to_string(),
                affine.display().to_string(),
            ]
        );

        let to_native = registry.resolve(Mni, Native).unwrap();
        assert_eq!(to_native.entries()[0].path, inverse_warp);
        assert_eq!(
            to_native.ants_args(),
            vec![
                "-t".to_string(),
                format!("[{},1]", affine.display()),
                "-t".to_string(),
                inverse_warp.display().to_string(),
            ]
        );
    }

    /// Resuming a finished subject invokes no tool at all
    #[tokio::test]
    async fn test_resume_completed_subject_is_noop() {
        let data = dataset(&["sub-001"]);
        let runner = PipelineRunner::new(
            anatomical_graph(&data.blueprint),
            &data.blueprint,
            MockToolAdapter::new(),
        )
        .unwrap();

        assert!(runner.run_subject("sub-001".into()).await.unwrap().is_success());
        runner.adapter().clear();

        let report = runner.run_subject("sub-001".into()).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.invocations, 0);
        assert_eq!(runner.adapter().invocation_count(), 0);
        assert!(report
            .run
            .stages
            .iter()
            .all(|r| r.skip_reason == Some(SkipReason::AlreadyComplete)));
    }

    /// An interrupted run picks up at the stage that failed
    #[tokio::test]
    async fn test_resume_after_failure_restarts_at_failed_stage() {
        let data = dataset(&["sub-001"]);
        let adapter = MockToolAdapter::new()
            .fail_stage("mni_normalization", 1, "out of memory")
            .only_once("mni_normalization");
        let runner =
            PipelineRunner::new(anatomical_graph(&data.blueprint), &data.blueprint, adapter)
                .unwrap();

        let first = runner.run_subject("sub-001".into()).await.unwrap();
        assert_eq!(first.run.status_of("mni_normalization"), Some(StageStatus::Failed));
        // tissue_segmentation does not depend on the registration
        assert_eq!(
            first.run.record("tissue_segmentation").unwrap().skip_reason,
            Some(SkipReason::RunHalted {
                after: "mni_normalization".into()
            })
        );
        let before = runner.adapter().invocation_count();

        let second = runner.run_subject("sub-001".into()).await.unwrap();
        assert!(second.is_success());
        assert_eq!(
            runner.adapter().invoked_stages()[before..],
            vec![
                "mni_normalization",
                "tissue_segmentation",
                "atlas_to_native"
            ]
        );
        assert_eq!(second.run.status_of("t1w_bias_correction"), Some(StageStatus::Skipped));
        assert_eq!(second.run.status_of("t1w_brain_extraction"), Some(StageStatus::Skipped));
    }

    /// Force mode reruns every stage and passes the MRtrix overwrite flag
    #[tokio::test]
    async fn test_force_mode_reruns_everything() {
        let data = dataset(&["sub-001"]);
        let runner = PipelineRunner::new(
            anatomical_graph(&data.blueprint),
            &data.blueprint,
            MockToolAdapter::new(),
        )
        .unwrap()
        .with_mode(RunMode::Force);

        runner.run_subject("sub-001".into()).await.unwrap();
        let report = runner.run_subject("sub-001".into()).await.unwrap();

        assert!(report.is_success());
        assert_eq!(report.invocations, 5);
        assert_eq!(runner.adapter().invocation_count(), 10);

        let segmentation = runner
            .adapter()
            .invocations()
            .into_iter()
            .rfind(|inv| inv.stage_id == "tissue_segmentation")
            .unwrap();
        assert_eq!(segmentation.args.last().map(String::as_str), Some("-force"));
    }

    /// Every catalogue stage runs once, in declared order, down to the connectome
    #[tokio::test]
    async fn test_full_pipeline_mock_run() {
        let data = dataset(&["sub-001"]);
        let graph = full_graph(&data.blueprint);
        let expected: Vec<_> = graph.stages().iter().map(|s| s.id.clone()).collect();
        let runner =
            PipelineRunner::new(graph, &data.blueprint, MockToolAdapter::new()).unwrap();

        let report = runner.run_subject("sub-001".into()).await.unwrap();

        if let Some(text) = report.failure_report() {
            panic!("{text}");
        }
        assert!(report.is_success());
        assert_eq!(expected.len(), 23);
        assert_eq!(runner.adapter().invoked_stages(), expected);
        assert!(report.valid_artifact("connectome").is_some());
        assert!(report.valid_artifact("sift2_weights").is_some());
    }

    /// A subject missing its T1w fails on its own; the others finish
    #[tokio::test]
    async fn test_batch_isolates_subject_failures() {
        let data = dataset(&["sub-001", "sub-002"]);
        std::fs::remove_file(
            data.dir
                .path()
                .join("bids/sub-002/anat/sub-002_T1w.nii.gz"),
        )
        .unwrap();

        let runner = std::sync::Arc::new(
            PipelineRunner::new(
                anatomical_graph(&data.blueprint),
                &data.blueprint,
                MockToolAdapter::new(),
            )
            .unwrap(),
        );
        let subjects = runner::discover_subjects(&data.blueprint.paths.bids_root).unwrap();
        assert_eq!(subjects.len(), 2);

        let batch = runner::run_batch(runner, subjects, 2).await;

        assert_eq!(batch.succeeded(), 1);
        assert_eq!(batch.failed(), 1);
        assert_eq!(batch.outcomes[0].subject, SubjectId::from("sub-001"));
        assert!(batch.outcomes[0].is_success());

        let failed = batch.outcomes[1].result.as_ref().unwrap();
        let record = failed.run.record("t1w_bias_correction").unwrap();
        assert_eq!(record.status, StageStatus::Failed);
        assert_eq!(
            record.failure.as_ref().unwrap().kind,
            FailureKind::UnsatisfiedDependency
        );

        let mut stats = observability::RunStatsAggregator::new();
        for report in batch.reports() {
            stats.update(&report.run, report.invocations);
        }
        let summary = stats.summary();
        assert_eq!(summary.subjects, 2);
        assert_eq!(summary.failed_subjects, 1);
        assert_eq!(summary.stage_failures.get("t1w_bias_correction"), Some(&1));
    }
}

#[cfg(test)]
mod config_tests {
    use std::fs;

    use config_loader::{ConfigLoader, Override};
    use runner::PipelineRunner;
    use tool_adapter::MockToolAdapter;

    use crate::fixtures::*;

    /// `--set` style overrides reach the rendered command line
    #[test]
    fn test_override_reaches_rendered_command() {
        let data = dataset(&["sub-001"]);
        let path = data.dir.path().join("connectome.toml");
        fs::write(&path, config_toml(data.dir.path())).unwrap();

        let overrides = [Override::parse("parameters.n4.shrink_factor=2").unwrap()];
        let blueprint = ConfigLoader::load_with_overrides(&path, &overrides).unwrap();
        let runner =
            PipelineRunner::new(anatomical_graph(&blueprint), &blueprint, MockToolAdapter::new())
                .unwrap();

        let plan = runner.plan("sub-001".into()).unwrap();
        assert_eq!(plan.len(), 5);
        assert!(plan[0].command.contains(" -s 2 "));
        assert!(plan.iter().all(|stage| !stage.complete));
        assert_eq!(runner.adapter().invocation_count(), 0);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let data = dataset(&[]);
        let path = data.dir.path().join("connectome.toml");
        fs::write(&path, config_toml(data.dir.path())).unwrap();

        let overrides = [Override::parse("parameters.tractography.min_length=500.0").unwrap()];
        let err = ConfigLoader::load_with_overrides(&path, &overrides).unwrap_err();
        assert!(err.is_config_error());
    }
}
