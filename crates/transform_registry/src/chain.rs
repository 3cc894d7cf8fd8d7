//! TransformChain - ordered transforms between two spaces

use std::path::Path;

use contracts::{CoordinateSpace, PipelineError, Transform, TransformKind};

/// Transforms in application order, carrying `from` into `to`
#[derive(Debug, Clone, PartialEq)]
pub struct TransformChain {
    from: CoordinateSpace,
    to: CoordinateSpace,
    entries: Vec<Transform>,
}

impl TransformChain {
    /// Build and validate a chain
    ///
    /// Consecutive entries with the same endpoints form one composite step;
    /// each step must start where the previous one ended.
    ///
    /// # Errors
    /// `InvalidTransformChain` when the entries do not chain spaces.
    pub fn new(
        from: CoordinateSpace,
        to: CoordinateSpace,
        entries: Vec<Transform>,
    ) -> Result<Self, PipelineError> {
        let chain = Self { from, to, entries };
        chain.validate()?;
        Ok(chain)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let mut at = self.from;
        let mut step: Option<(CoordinateSpace, CoordinateSpace)> = None;

        for t in &self.entries {
            let endpoints = (t.source_space, t.target_space);
            if step == Some(endpoints) {
                // Member of the current composite step
                continue;
            }
            if t.source_space != at {
                return Err(PipelineError::InvalidTransformChain {
                    message: format!(
                        "'{}' starts in {} but the chain is in {}",
                        t.name, t.source_space, at
                    ),
                });
            }
            at = t.target_space;
            step = Some(endpoints);
        }

        if at != self.to {
            return Err(PipelineError::InvalidTransformChain {
                message: format!("chain ends in {at}, expected {}", self.to),
            });
        }
        Ok(())
    }

    pub fn from(&self) -> CoordinateSpace {
        self.from
    }

    pub fn to(&self) -> CoordinateSpace {
        self.to
    }

    pub fn entries(&self) -> &[Transform] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Files the chain reads, in application order
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|t| t.path.as_path())
    }

    /// `antsApplyTransforms` arguments
    ///
    /// ANTs applies the last `-t` first, so entries are emitted in reverse
    /// application order. Inverse affines reuse the forward matrix with the
    /// inversion flag (`[file,1]`); inverse warps are separate files.
    pub fn ants_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.entries.len() * 2);
        for t in self.entries.iter().rev() {
            args.push("-t".to_string());
            let file = t.path.display();
            match t.kind {
                TransformKind::InverseAffine => args.push(format!("[{file},1]")),
                TransformKind::Affine | TransformKind::Warp | TransformKind::InverseWarp => {
                    args.push(file.to_string())
                }
            }
        }
        args
    }
}
