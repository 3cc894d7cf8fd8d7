//! Command implementations.

mod batch;
mod info;
mod run;
mod validate;

pub use batch::run_batch_command;
pub use info::run_info;
pub use run::run_subject_command;
pub use validate::run_validate;

use std::path::Path;

use config_loader::{ConfigLoader, Override, PipelineBlueprint};
use contracts::ToolAdapter;
use runner::{AbortSignal, PipelineRunner};
use stage_graph::{connectome, StageGraph};
use tracing::info;

use crate::cli::PipelineArgs;
use crate::error::{CliError, Result};

/// Load the configuration, applying `--set` overrides before validation
pub(crate) fn load_blueprint(path: &Path, raw_overrides: &[String]) -> Result<PipelineBlueprint> {
    if !path.exists() {
        return Err(CliError::config_not_found(path.display().to_string()));
    }
    let overrides = raw_overrides
        .iter()
        .map(|raw| Override::parse(raw))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let blueprint = ConfigLoader::load_with_overrides(path, &overrides)?;
    info!(
        config = %path.display(),
        overrides = overrides.len(),
        bids_root = %blueprint.paths.bids_root.display(),
        derivatives_root = %blueprint.paths.derivatives_root.display(),
        "Configuration loaded"
    );
    Ok(blueprint)
}

/// Build and validate the connectome stage graph, cut at `until` if given
pub(crate) fn build_graph(blueprint: &PipelineBlueprint, until: Option<&str>) -> Result<StageGraph> {
    let graph = StageGraph::new(connectome::definition(blueprint))?;
    match until {
        Some(stage) if graph.position(stage).is_none() => Err(CliError::unknown_stage(stage)),
        Some(stage) => Ok(graph.through(stage)?),
        None => Ok(graph),
    }
}

/// Runner with the command line options applied over the configured ones
pub(crate) fn build_runner<A: ToolAdapter>(
    args: &PipelineArgs,
    blueprint: &PipelineBlueprint,
    adapter: A,
    abort: AbortSignal,
) -> Result<PipelineRunner<A>> {
    let graph = build_graph(blueprint, args.until.as_deref())?;
    let mut runner = PipelineRunner::new(graph, blueprint, adapter)?.with_abort(abort);
    if let Some(mode) = args.mode {
        runner = runner.with_mode(mode.into());
    }
    if args.keep_going {
        runner = runner.with_halt_on_failure(false);
    }
    Ok(runner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir) -> std::path::PathBuf {
        let path = dir.path().join("connectome.toml");
        let content = format!(
            r#"
version = "v1"

[paths]
bids_root = "{root}/bids"
derivatives_root = "{root}/derivatives"
template_dir = "{root}/templates"
"#,
            root = dir.path().display()
        );
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_missing_config() {
        let dir = TempDir::new().unwrap();
        let err = load_blueprint(&dir.path().join("nope.toml"), &[]).unwrap_err();
        assert!(matches!(err, CliError::ConfigNotFound { .. }));
    }

    #[test]
    fn test_overrides_applied() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir);
        let blueprint =
            load_blueprint(&path, &["parameters.tractography.select=5000".to_string()]).unwrap();
        assert_eq!(
            blueprint.parameters.lookup("tractography.select").as_deref(),
            Some("5000")
        );
    }

    #[test]
    fn test_until_cuts_graph() {
        let dir = TempDir::new().unwrap();
        let blueprint = load_blueprint(&write_config(&dir), &[]).unwrap();

        let graph = build_graph(&blueprint, Some("t1w_brain_extraction")).unwrap();
        assert_eq!(graph.len(), 2);

        let err = build_graph(&blueprint, Some("nonexistent")).unwrap_err();
        assert!(matches!(err, CliError::UnknownStage { .. }));
    }
}
