//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::{SourceLocation, StageSpec};
use serde::Serialize;
use stage_graph::StageGraph;
use tracing::info;

use super::{build_graph, load_blueprint};
use crate::cli::InfoArgs;

/// Stage plan for JSON output
#[derive(Serialize)]
struct PipelineInfo {
    pipeline_version: String,
    bids_root: String,
    derivatives_root: String,
    template_dir: String,
    sources: Vec<SourceInfo>,
    stages: Vec<StageInfo>,
}

#[derive(Serialize)]
struct SourceInfo {
    name: String,
    space: String,
    location: String,
}

#[derive(Serialize)]
struct StageInfo {
    id: String,
    description: String,
    modality: String,
    program: String,
    idempotent: bool,
    depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    requires: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    requires_transforms: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    produces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    produces_transforms: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading pipeline info");

    let blueprint = load_blueprint(&args.config, &[])
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    let graph = build_graph(&blueprint, None)?;

    let info = PipelineInfo {
        pipeline_version: graph.version().to_string(),
        bids_root: blueprint.paths.bids_root.display().to_string(),
        derivatives_root: blueprint.paths.derivatives_root.display().to_string(),
        template_dir: blueprint.paths.template_dir.display().to_string(),
        sources: graph
            .sources()
            .iter()
            .map(|s| SourceInfo {
                name: s.name.to_string(),
                space: s.space.to_string(),
                location: describe_location(&s.location),
            })
            .collect(),
        stages: graph
            .stages()
            .iter()
            .map(|stage| build_stage_info(&graph, stage, args.stages))
            .collect(),
    };

    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize pipeline info")?;
        println!("{}", json);
    } else {
        print_pipeline_info(&info, args.stages);
    }

    Ok(())
}

fn describe_location(location: &SourceLocation) -> String {
    match location {
        SourceLocation::Bids { datatype, suffix } => {
            format!("{{bids_root}}/{{subject}}/{}/{{subject}}{suffix}", datatype.dir_name())
        }
        SourceLocation::Template { file_name } => format!("{{template_dir}}/{file_name}"),
    }
}

fn build_stage_info(graph: &StageGraph, stage: &StageSpec, detailed: bool) -> StageInfo {
    let listed = |names: Vec<String>| if detailed { names } else { Vec::new() };

    StageInfo {
        id: stage.id.to_string(),
        description: stage.description.clone(),
        modality: stage.modality.dir_name().to_string(),
        program: stage.command.program.clone(),
        idempotent: stage.idempotent,
        depends_on: graph
            .dependencies(&stage.id)
            .into_iter()
            .map(ToString::to_string)
            .collect(),
        requires: listed(stage.required_artifacts.iter().map(ToString::to_string).collect()),
        requires_transforms: listed(
            stage.required_transforms.iter().map(ToString::to_string).collect(),
        ),
        produces: listed(
            stage
                .produced_artifacts
                .iter()
                .map(|a| format!("{} ({}, {})", a.name, a.file_name, a.space))
                .collect(),
        ),
        produces_transforms: listed(
            stage
                .produced_transforms
                .iter()
                .map(|t| format!("{} ({} -> {}, {:?})", t.name, t.source_space, t.target_space, t.kind))
                .collect(),
        ),
        command: detailed.then(|| stage.command_template()),
    }
}

fn print_pipeline_info(info: &PipelineInfo, detailed: bool) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Connectome Pipeline                            ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📁 Paths");
    println!("   ├─ Version: {}", info.pipeline_version);
    println!("   ├─ BIDS: {}", info.bids_root);
    println!("   ├─ Derivatives: {}", info.derivatives_root);
    println!("   └─ Templates: {}", info.template_dir);

    println!("\n📥 Inputs ({})", info.sources.len());
    for (i, source) in info.sources.iter().enumerate() {
        let prefix = if i == info.sources.len() - 1 { "└─" } else { "├─" };
        println!("   {} {} [{}] {}", prefix, source.name, source.space, source.location);
    }

    println!("\n⚙️  Stages ({})", info.stages.len());
    for (i, stage) in info.stages.iter().enumerate() {
        let is_last = i == info.stages.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child = if is_last { "   " } else { "│  " };

        let rerun = if stage.idempotent { "" } else { ", not idempotent" };
        println!(
            "   {} {:>2}. {} ({}, {}{})",
            prefix,
            i + 1,
            stage.id,
            stage.program,
            stage.modality,
            rerun
        );
        if !stage.description.is_empty() {
            println!("   {}      {}", child, stage.description);
        }
        if !detailed {
            continue;
        }
        if !stage.depends_on.is_empty() {
            println!("   {}      after: {}", child, stage.depends_on.join(", "));
        }
        for name in stage.requires.iter().chain(&stage.requires_transforms) {
            println!("   {}      < {}", child, name);
        }
        for name in stage.produces.iter().chain(&stage.produces_transforms) {
            println!("   {}      > {}", child, name);
        }
        if let Some(command) = &stage.command {
            println!("   {}      $ {}", child, command);
        }
    }

    println!();
}
