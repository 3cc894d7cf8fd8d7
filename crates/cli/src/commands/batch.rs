//! `batch` command implementation.

use std::sync::Arc;

use anyhow::{Context, Result};
use contracts::SubjectId;
use observability::RunStatsAggregator;
use runner::{discover_subjects, run_batch, AbortSignal, EXIT_ABORTED};
use tool_adapter::ProcessToolAdapter;
use tracing::{error, info};

use super::run::print_report;
use super::{build_runner, load_blueprint};
use crate::cli::BatchArgs;
use crate::error::CliError;
use crate::shutdown;

/// Execute the `batch` command, returning the process exit code
pub async fn run_batch_command(args: &BatchArgs) -> Result<i32> {
    let blueprint = load_blueprint(&args.pipeline.config, &args.pipeline.overrides)?;

    let subjects: Vec<SubjectId> = if args.subjects.is_empty() {
        discover_subjects(&blueprint.paths.bids_root).with_context(|| {
            format!(
                "Failed to list subjects in {}",
                blueprint.paths.bids_root.display()
            )
        })?
    } else {
        args.subjects
            .iter()
            .map(|s| SubjectId::from(s.trim()))
            .collect()
    };
    if subjects.is_empty() {
        return Err(CliError::no_subjects(blueprint.paths.bids_root.display().to_string()).into());
    }

    let abort = AbortSignal::new();
    let adapter = ProcessToolAdapter::from_config(&blueprint.tools);
    let runner = Arc::new(build_runner(
        &args.pipeline,
        &blueprint,
        adapter,
        abort.clone(),
    )?);

    let watcher = tokio::spawn(shutdown::raise_on_signal(abort.clone()));
    info!(subjects = subjects.len(), jobs = args.jobs, "Starting batch...");
    let batch = run_batch(runner, subjects, args.jobs).await;
    watcher.abort();

    let mut stats = RunStatsAggregator::new();
    for outcome in &batch.outcomes {
        match &outcome.result {
            Ok(report) => {
                observability::record_run_metrics(&report.run, report.invocations);
                stats.update(&report.run, report.invocations);
                print_report(report);
            }
            Err(e) => {
                error!(subject = %outcome.subject, error = %e, "Subject could not run");
                println!("{}: could not run: {e}\n", outcome.subject);
            }
        }
    }
    println!("{}", stats.summary());

    let exit_code = if batch.reports().any(|r| r.run.was_aborted()) {
        EXIT_ABORTED
    } else if batch.is_success() {
        0
    } else {
        1
    };
    info!(
        succeeded = batch.succeeded(),
        failed = batch.failed(),
        exit_code,
        "Batch finished"
    );
    Ok(exit_code)
}
