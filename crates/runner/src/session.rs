//! SubjectSession - the bookkeeping state of one subject run

use artifact_store::{ArtifactStore, SubjectLayout};
use contracts::{
    ArtifactName, PathsConfig, PipelineError, Producer, StageSpec, SubjectId, Transform,
};
use stage_graph::StageGraph;
use tracing::{debug, warn};
use transform_registry::TransformRegistry;

/// Store, registry and path layout owned by one subject for one run
///
/// Every source and every declared stage output is registered up front with
/// its deterministic path; sources are adopted immediately, stage outputs
/// stay pending until their stage completes.
#[derive(Debug)]
pub struct SubjectSession {
    layout: SubjectLayout,
    store: ArtifactStore,
    registry: TransformRegistry,
}

impl SubjectSession {
    pub fn open(
        subject: SubjectId,
        graph: &StageGraph,
        paths: &PathsConfig,
    ) -> Result<Self, PipelineError> {
        let layout = SubjectLayout::new(subject, paths)?;
        let mut store = ArtifactStore::new();

        for source in graph.sources() {
            store.register(
                source.name.clone(),
                layout.source_path(source),
                source.space,
                Producer::Input,
            )?;
            if !store.adopt(&source.name) {
                warn!(
                    subject = %layout.subject(),
                    input = %source.name,
                    path = %layout.source_path(source).display(),
                    "Pipeline input missing"
                );
            }
        }

        for stage in graph.stages() {
            for decl in &stage.produced_artifacts {
                store.register(
                    decl.name.clone(),
                    layout.derivative_path(stage.modality, &decl.file_name),
                    decl.space,
                    Producer::Stage(stage.id.clone()),
                )?;
            }
        }

        debug!(subject = %layout.subject(), artifacts = store.len(), "Session opened");
        Ok(Self {
            layout,
            store,
            registry: TransformRegistry::new(),
        })
    }

    pub fn subject(&self) -> &SubjectId {
        self.layout.subject()
    }

    pub fn layout(&self) -> &SubjectLayout {
        &self.layout
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn registry(&self) -> &TransformRegistry {
        &self.registry
    }

    pub(crate) fn store_mut(&mut self) -> &mut ArtifactStore {
        &mut self.store
    }

    /// Inputs whose files are absent or empty
    pub fn missing_inputs<'a>(&self, graph: &'a StageGraph) -> Vec<&'a ArtifactName> {
        graph
            .sources()
            .iter()
            .map(|s| &s.name)
            .filter(|name| !self.store.exists(name))
            .collect()
    }

    /// Register the transforms a stage declares
    ///
    /// With `require_valid` the backing files must be valid artifacts;
    /// otherwise their declared paths are used as they are (plan preview).
    pub(crate) fn register_transforms(
        &mut self,
        stage: &StageSpec,
        require_valid: bool,
    ) -> Result<(), PipelineError> {
        for decl in &stage.produced_transforms {
            let path = self.backing_path(&decl.file, require_valid)?;
            let mut transform = Transform::new(
                decl.name.clone(),
                decl.source_space,
                decl.target_space,
                decl.kind,
                path,
            );
            if let Some(inverse) = &decl.inverse_file {
                transform = transform.with_inverse(self.backing_path(inverse, require_valid)?);
            }
            self.registry.insert(transform)?;
        }
        Ok(())
    }

    fn backing_path(
        &self,
        name: &ArtifactName,
        require_valid: bool,
    ) -> Result<std::path::PathBuf, PipelineError> {
        if require_valid {
            return Ok(self.store.get(name)?.path.clone());
        }
        self.store
            .path_of(name)
            .map(|p| p.to_path_buf())
            .ok_or_else(|| PipelineError::ArtifactNotRegistered {
                name: name.to_string(),
            })
    }
}
