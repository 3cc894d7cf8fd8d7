//! `validate` command implementation.

use anyhow::{Context, Result};
use config_loader::PipelineBlueprint;
use serde::Serialize;
use stage_graph::StageGraph;
use tracing::info;

use super::{build_graph, load_blueprint};
use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<GraphSummary>,
}

#[derive(Serialize)]
struct GraphSummary {
    pipeline_version: String,
    stages: usize,
    sources: usize,
    artifacts: usize,
    transforms: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();
    let checked = load_blueprint(&args.config, &[])
        .and_then(|blueprint| build_graph(&blueprint, None).map(|graph| (blueprint, graph)));

    match checked {
        Ok((blueprint, graph)) => ValidationResult {
            valid: true,
            config_path,
            error: None,
            warnings: collect_warnings(&blueprint),
            summary: Some(summarize(&graph)),
        },
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: Vec::new(),
            summary: None,
        },
    }
}

fn summarize(graph: &StageGraph) -> GraphSummary {
    let stages = graph.stages();
    GraphSummary {
        pipeline_version: graph.version().to_string(),
        stages: stages.len(),
        sources: graph.sources().len(),
        artifacts: stages.iter().map(|s| s.produced_artifacts.len()).sum(),
        transforms: stages.iter().map(|s| s.produced_transforms.len()).sum(),
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();
    let paths = &blueprint.paths;

    if !paths.bids_root.is_dir() {
        warnings.push(format!(
            "bids_root {} does not exist yet",
            paths.bids_root.display()
        ));
    }
    if !paths.template_dir.is_dir() {
        warnings.push(format!(
            "template_dir {} does not exist - template stages will fail",
            paths.template_dir.display()
        ));
    }
    if paths.derivatives_root.starts_with(&paths.bids_root) {
        warnings.push("derivatives_root lies inside bids_root".to_string());
    }
    if !blueprint.run.write_manifest {
        warnings.push("run.write_manifest is off - runs leave no manifest".to_string());
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Pipeline: {}", summary.pipeline_version);
            println!("  Stages: {}", summary.stages);
            println!("  Inputs: {}", summary.sources);
            println!("  Artifacts: {}", summary.artifacts);
            println!("  Transforms: {}", summary.transforms);
        }

        if !result.warnings.is_empty() {
            println!("\n⚠ Warnings:");
            for warning in &result.warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
