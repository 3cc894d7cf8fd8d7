//! Argument template rendering

use contracts::{ArgToken, PipelineError, PipelineParameters, StageSpec, ToolInvocation};
use stage_graph::StageGraph;

use crate::session::SubjectSession;

/// How input tokens are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderMode {
    /// Inputs must be valid artifacts
    Execute,
    /// Declared paths are used whether or not the files exist yet
    Preview,
}

/// Check that every parameter referenced by a template is configured
pub(crate) fn check_parameters(
    graph: &StageGraph,
    parameters: &PipelineParameters,
) -> Result<(), PipelineError> {
    for stage in graph.stages() {
        for token in stage.tokens() {
            if let ArgToken::Param(key) = token {
                if parameters.lookup(key).is_none() {
                    return Err(PipelineError::template(
                        stage.id.as_str(),
                        token.to_string(),
                        format!("unknown parameter '{key}'"),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Build the tool invocation of a stage
///
/// The force flag is appended last when requested.
pub(crate) fn render_invocation(
    stage: &StageSpec,
    session: &SubjectSession,
    parameters: &PipelineParameters,
    mode: RenderMode,
    force: bool,
) -> Result<ToolInvocation, PipelineError> {
    let renderer = Renderer {
        stage,
        session,
        parameters,
        mode,
    };

    let mut args = Vec::with_capacity(stage.command.args.len() + 1);
    for token in &stage.command.args {
        renderer.expand(token, &mut args)?;
    }
    if force {
        if let Some(flag) = &stage.command.force_flag {
            args.push(flag.clone());
        }
    }

    let outputs = stage
        .produced_artifacts
        .iter()
        .map(|decl| renderer.output_path(&decl.name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ToolInvocation {
        stage_id: stage.id.clone(),
        program: stage.command.program.clone(),
        args,
        outputs,
        env: Vec::new(),
    })
}

struct Renderer<'a> {
    stage: &'a StageSpec,
    session: &'a SubjectSession,
    parameters: &'a PipelineParameters,
    mode: RenderMode,
}

impl Renderer<'_> {
    /// Render a token into zero or more arguments
    fn expand(&self, token: &ArgToken, out: &mut Vec<String>) -> Result<(), PipelineError> {
        match token {
            ArgToken::Chain { from, to } => {
                let chain = self.session.registry().resolve(*from, *to)?;
                out.extend(chain.ants_args());
            }
            other => out.push(self.single(other)?),
        }
        Ok(())
    }

    /// Render a token that must produce exactly one argument
    fn single(&self, token: &ArgToken) -> Result<String, PipelineError> {
        match token {
            ArgToken::Literal(s) => Ok(s.clone()),
            ArgToken::Input(name) => self.input_path(name),
            ArgToken::Output(name) => Ok(display(&self.output_path(name)?)),
            ArgToken::OutputPrefix(prefix) => Ok(display(
                &self
                    .session
                    .layout()
                    .output_prefix(self.stage.modality, prefix),
            )),
            ArgToken::Param(key) => self
                .parameters
                .lookup(key)
                .ok_or_else(|| self.error(token, format!("unknown parameter '{key}'"))),
            ArgToken::Concat(parts) => parts.iter().try_fold(String::new(), |mut acc, part| {
                acc.push_str(&self.single(part)?);
                Ok(acc)
            }),
            ArgToken::Chain { .. } => {
                Err(self.error(token, "a transform chain cannot be joined into one argument"))
            }
        }
    }

    fn input_path(&self, name: &str) -> Result<String, PipelineError> {
        let store = self.session.store();
        match self.mode {
            RenderMode::Execute => Ok(display(&store.get(name)?.path)),
            RenderMode::Preview => store
                .path_of(name)
                .map(display)
                .ok_or_else(|| PipelineError::ArtifactNotRegistered {
                    name: name.to_string(),
                }),
        }
    }

    fn output_path(&self, name: &str) -> Result<std::path::PathBuf, PipelineError> {
        self.session
            .store()
            .path_of(name)
            .map(|p| p.to_path_buf())
            .ok_or_else(|| PipelineError::ArtifactNotRegistered {
                name: name.to_string(),
            })
    }

    fn error(&self, token: &ArgToken, message: impl Into<String>) -> PipelineError {
        PipelineError::template(self.stage.id.as_str(), token.to_string(), message)
    }
}

fn display(path: &std::path::Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::arg::{chain, concat, input, lit, output, param, prefix};
    use contracts::{
        BidsDatatype, CoordinateSpace, Modality, PathsConfig, PipelineDefinition, SourceDecl,
        TransformDecl, TransformKind,
    };
    use tempfile::TempDir;

    use CoordinateSpace::{DwiB0, Native};

    fn graph() -> StageGraph {
        let register = StageSpec::new("register", Modality::Dwi, "antsRegistrationSyN.sh")
            .requires(&["t1w", "b0"])
            .produces("affine", "from-T1w_to-dwi_0GenericAffine.mat", DwiB0)
            .produces_transform(TransformDecl {
                name: "native_to_dwi".into(),
                source_space: Native,
                target_space: DwiB0,
                kind: TransformKind::Affine,
                file: "affine".into(),
                inverse_file: None,
            })
            .args([
                lit("-f"),
                input("b0"),
                lit("-m"),
                input("t1w"),
                lit("-n"),
                param("registration.threads"),
                lit("-o"),
                prefix("from-T1w_to-dwi_"),
            ]);
        let apply = StageSpec::new("apply", Modality::Dwi, "antsApplyTransforms")
            .requires(&["t1w", "b0"])
            .requires_transforms(&["native_to_dwi"])
            .produces("t1w_dwi", "space-dwi_T1w.nii.gz", DwiB0)
            .args([
                lit("-i"),
                input("t1w"),
                lit("-r"),
                input("b0"),
                chain(Native, DwiB0),
                lit("-o"),
                concat([lit("["), output("t1w_dwi"), lit(",1]")]),
            ])
            .force_flag("--force");
        StageGraph::new(PipelineDefinition {
            version: "test".into(),
            sources: vec![
                SourceDecl::bids("t1w", Native, BidsDatatype::Anat, "_T1w.nii.gz"),
                SourceDecl::bids("b0", DwiB0, BidsDatatype::Dwi, "_b0.nii.gz"),
            ],
            stages: vec![register, apply],
        })
        .unwrap()
    }

    fn session(dir: &TempDir, graph: &StageGraph) -> SubjectSession {
        for rel in ["bids/sub-001/anat/sub-001_T1w.nii.gz", "bids/sub-001/dwi/sub-001_b0.nii.gz"] {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"x").unwrap();
        }
        let paths = PathsConfig {
            bids_root: dir.path().join("bids"),
            derivatives_root: dir.path().join("out"),
            template_dir: dir.path().join("tpl"),
        };
        SubjectSession::open("sub-001".into(), graph, &paths).unwrap()
    }

    #[test]
    fn test_renders_paths_params_and_prefix() {
        let dir = TempDir::new().unwrap();
        let graph = graph();
        let session = session(&dir, &graph);
        let params = PipelineParameters::default();

        let inv = render_invocation(&graph.stages()[0], &session, &params, RenderMode::Execute, true)
            .unwrap();
        let root = dir.path().display().to_string();
        assert_eq!(inv.program, "antsRegistrationSyN.sh");
        assert_eq!(
            inv.args,
            vec![
                "-f".to_string(),
                format!("{root}/bids/sub-001/dwi/sub-001_b0.nii.gz"),
                "-m".to_string(),
                format!("{root}/bids/sub-001/anat/sub-001_T1w.nii.gz"),
                "-n".to_string(),
                params.registration.threads.to_string(),
                "-o".to_string(),
                format!("{root}/out/sub-001/dwi/sub-001_from-T1w_to-dwi_"),
            ]
        );
        assert_eq!(
            inv.outputs,
            vec![dir
                .path()
                .join("out/sub-001/dwi/sub-001_from-T1w_to-dwi_0GenericAffine.mat")]
        );
    }

    #[test]
    fn test_chain_expands_and_force_flag_appended() {
        let dir = TempDir::new().unwrap();
        let graph = graph();
        let mut session = session(&dir, &graph);
        session.register_transforms(&graph.stages()[0], false).unwrap();
        let params = PipelineParameters::default();

        let inv = render_invocation(&graph.stages()[1], &session, &params, RenderMode::Execute, true)
            .unwrap();
        let root = dir.path().display().to_string();
        let affine = format!("{root}/out/sub-001/dwi/sub-001_from-T1w_to-dwi_0GenericAffine.mat");
        assert_eq!(inv.args[4], "-t");
        assert_eq!(inv.args[5], affine);
        assert_eq!(
            inv.args[7],
            format!("[{root}/out/sub-001/dwi/sub-001_space-dwi_T1w.nii.gz,1]")
        );
        assert_eq!(inv.args.last().map(String::as_str), Some("--force"));

        let unforced =
            render_invocation(&graph.stages()[1], &session, &params, RenderMode::Execute, false)
                .unwrap();
        assert_eq!(unforced.args.len(), inv.args.len() - 1);
    }

    #[test]
    fn test_missing_chain_is_an_error() {
        let dir = TempDir::new().unwrap();
        let graph = graph();
        let session = session(&dir, &graph);
        let err = render_invocation(
            &graph.stages()[1],
            &session,
            &PipelineParameters::default(),
            RenderMode::Execute,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::NoTransformPath { .. }));
    }

    #[test]
    fn test_preview_uses_declared_paths() {
        let dir = TempDir::new().unwrap();
        let graph = graph();
        let mut session = session(&dir, &graph);
        std::fs::remove_file(dir.path().join("bids/sub-001/dwi/sub-001_b0.nii.gz")).unwrap();
        session.store_mut().invalidate("b0");
        let params = PipelineParameters::default();

        assert!(render_invocation(&graph.stages()[0], &session, &params, RenderMode::Execute, false)
            .is_err());
        assert!(render_invocation(&graph.stages()[0], &session, &params, RenderMode::Preview, false)
            .is_ok());
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let stage = StageSpec::new("n4", Modality::Anat, "N4BiasFieldCorrection")
            .requires(&["t1w"])
            .produces("out", "out.nii.gz", Native)
            .args([lit("-s"), param("n4.no_such_key"), output("out")]);
        let bad = StageGraph::new(PipelineDefinition {
            version: "test".into(),
            sources: vec![SourceDecl::bids("t1w", Native, BidsDatatype::Anat, "_T1w.nii.gz")],
            stages: vec![stage],
        })
        .unwrap();

        let err = check_parameters(&bad, &PipelineParameters::default()).unwrap_err();
        assert!(matches!(err, PipelineError::Template { ref stage, .. } if stage == "n4"));
        assert!(check_parameters(&graph(), &PipelineParameters::default()).is_ok());
    }
}
