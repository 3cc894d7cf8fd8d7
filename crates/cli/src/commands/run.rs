//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::SubjectId;
use runner::{AbortSignal, PlannedStage, RunReport};
use tool_adapter::ProcessToolAdapter;
use tracing::info;

use super::{build_runner, load_blueprint};
use crate::cli::RunArgs;
use crate::shutdown;

/// Execute the `run` command, returning the process exit code
pub async fn run_subject_command(args: &RunArgs) -> Result<i32> {
    let blueprint = load_blueprint(&args.pipeline.config, &args.pipeline.overrides)?;
    let abort = AbortSignal::new();
    let adapter = ProcessToolAdapter::from_config(&blueprint.tools);
    let runner = build_runner(&args.pipeline, &blueprint, adapter, abort.clone())?;
    let subject = SubjectId::from(args.subject.as_str());

    if args.dry_run {
        info!("Dry run mode - rendering commands without running tools");
        let plan = runner
            .plan(subject.clone())
            .with_context(|| format!("Failed to plan {subject}"))?;
        print_plan(&subject, &plan);
        return Ok(0);
    }

    let watcher = tokio::spawn(shutdown::raise_on_signal(abort));

    info!(subject = %subject, stages = runner.graph().len(), "Starting pipeline...");
    let result = runner.run_subject(subject.clone()).await;
    watcher.abort();

    let report = result.with_context(|| format!("Failed to set up {subject}"))?;
    observability::record_run_metrics(&report.run, report.invocations);

    if args.json {
        let json = serde_json::to_string_pretty(&report.to_manifest())
            .context("Failed to serialize run record")?;
        println!("{json}");
    } else {
        print_report(&report);
    }

    info!(exit_code = report.exit_code(), "Connectome run finished");
    Ok(report.exit_code())
}

fn print_plan(subject: &SubjectId, plan: &[PlannedStage]) {
    println!("\n=== Plan for {subject} ===\n");
    for (idx, stage) in plan.iter().enumerate() {
        let marker = if stage.complete { "done" } else { "run " };
        println!("{:>3}. [{marker}] {}", idx + 1, stage.stage_id);
        println!("       {}", stage.command);
    }
    let pending = plan.iter().filter(|s| !s.complete).count();
    println!("\n{pending} of {} stages would run\n", plan.len());
}

pub(super) fn print_report(report: &RunReport) {
    println!("{report}");
    if let Some(failures) = report.failure_report() {
        println!("{failures}");
    }
    if let Some(path) = &report.manifest_path {
        println!("Manifest: {}", path.display());
    }
}
