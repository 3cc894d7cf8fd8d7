//! ArtifactStore - per-subject registry of file-backed artifacts

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use contracts::{Artifact, ArtifactName, CoordinateSpace, PipelineError, Producer};
use tracing::{debug, warn};

/// Named artifacts of one subject
///
/// An artifact is registered as pending when its producer is declared and
/// becomes valid only through [`ArtifactStore::mark_valid`], which checks that
/// the file exists with non-zero size. Validity is never flipped on a failed
/// check.
#[derive(Debug, Default)]
pub struct ArtifactStore {
    entries: Vec<Artifact>,
    index: HashMap<ArtifactName, usize>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending artifact
    ///
    /// Re-registration by the declaring producer resets validity (a rerun
    /// replaces the file); any other producer is rejected.
    ///
    /// # Errors
    /// `ArtifactConflict` when `name` belongs to a different producer.
    pub fn register(
        &mut self,
        name: ArtifactName,
        path: impl Into<PathBuf>,
        space: CoordinateSpace,
        producer: Producer,
    ) -> Result<(), PipelineError> {
        let path = path.into();
        if let Some(&idx) = self.index.get(&name) {
            let existing = &mut self.entries[idx];
            if existing.produced_by != producer {
                return Err(PipelineError::ArtifactConflict {
                    name: name.to_string(),
                    owner: existing.produced_by.to_string(),
                    claimant: producer.to_string(),
                });
            }
            debug!(artifact = %name, path = %path.display(), "Re-registering artifact");
            existing.path = path;
            existing.space = space;
            existing.valid = false;
            return Ok(());
        }

        debug!(artifact = %name, path = %path.display(), producer = %producer, "Registering artifact");
        self.index.insert(name.clone(), self.entries.len());
        self.entries
            .push(Artifact::pending(name, path, space, producer));
        Ok(())
    }

    /// Check the artifact's file and flip it to valid
    ///
    /// # Errors
    /// - `ArtifactNotRegistered` for an undeclared name
    /// - `ArtifactProductionFailed` when the file is absent, not a regular
    ///   file, or empty; the artifact stays invalid
    pub fn mark_valid(&mut self, name: &str) -> Result<&Artifact, PipelineError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| PipelineError::ArtifactNotRegistered {
                name: name.to_string(),
            })?;

        let artifact = &mut self.entries[idx];
        if let Err(reason) = check_file(&artifact.path) {
            warn!(artifact = name, path = %artifact.path.display(), reason, "Artifact not produced");
            return Err(PipelineError::production_failed(
                name,
                artifact.path.clone(),
                reason,
            ));
        }

        artifact.valid = true;
        debug!(artifact = name, "Artifact valid");
        Ok(&*artifact)
    }

    /// Resume probe: `mark_valid` reporting success as a bool
    pub fn adopt(&mut self, name: &str) -> bool {
        self.mark_valid(name).is_ok()
    }

    /// Valid artifact by name
    ///
    /// # Errors
    /// `ArtifactMissing` when the artifact is unknown or not yet valid.
    pub fn get(&self, name: &str) -> Result<&Artifact, PipelineError> {
        self.lookup(name)
            .filter(|a| a.valid)
            .ok_or_else(|| PipelineError::ArtifactMissing {
                name: name.to_string(),
            })
    }

    /// Registered, valid, and the file is still present with non-zero size
    pub fn exists(&self, name: &str) -> bool {
        self.lookup(name)
            .is_some_and(|a| a.valid && check_file(&a.path).is_ok())
    }

    /// Reset an artifact to pending; returns whether it was valid
    pub fn invalidate(&mut self, name: &str) -> bool {
        match self.index.get(name) {
            Some(&idx) => std::mem::replace(&mut self.entries[idx].valid, false),
            None => false,
        }
    }

    /// Invalidate an artifact and delete its file if present
    ///
    /// Returns whether a file was removed.
    pub fn discard(&mut self, name: &str) -> Result<bool, PipelineError> {
        self.invalidate(name);
        let Some(artifact) = self.lookup(name) else {
            return Ok(false);
        };
        match fs::remove_file(&artifact.path) {
            Ok(()) => {
                debug!(artifact = name, path = %artifact.path.display(), "Removed stale output");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Registered artifact regardless of validity
    pub fn lookup(&self, name: &str) -> Option<&Artifact> {
        self.index.get(name).map(|&idx| &self.entries[idx])
    }

    /// Declared path of a registered artifact (valid or pending)
    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.lookup(name).map(|a| a.path.as_path())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All artifacts in registration order
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.entries.iter()
    }

    pub fn valid_artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.entries.iter().filter(|a| a.valid)
    }

    /// Artifacts declared by one producer
    pub fn produced_by<'a>(&'a self, producer: &'a Producer) -> impl Iterator<Item = &'a Artifact> {
        self.entries.iter().filter(move |a| &a.produced_by == producer)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn check_file(path: &Path) -> Result<(), &'static str> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(_) => return Err("file does not exist"),
    };
    if !meta.is_file() {
        return Err("not a regular file");
    }
    if meta.len() == 0 {
        return Err("file is empty");
    }
    Ok(())
}
