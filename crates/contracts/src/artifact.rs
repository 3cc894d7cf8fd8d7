//! Artifact - file-backed stage output

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::{ArtifactName, CoordinateSpace, StageId};

/// Who brings an artifact into existence
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "stage")]
pub enum Producer {
    /// Raw dataset or template file, present before the run starts
    Input,
    /// Output of a pipeline stage
    Stage(StageId),
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("<input>"),
            Self::Stage(id) => write!(f, "{id}"),
        }
    }
}

/// One named artifact of a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Unique per subject
    pub name: ArtifactName,

    /// Absolute location on disk
    pub path: PathBuf,

    /// Space the image lives in
    pub space: CoordinateSpace,

    /// Stage (or input) that produces the file
    pub produced_by: Producer,

    /// Set only after the producer finished and the file was checked
    pub valid: bool,
}

impl Artifact {
    /// Create a pending (not yet valid) artifact
    pub fn pending(
        name: ArtifactName,
        path: impl Into<PathBuf>,
        space: CoordinateSpace,
        produced_by: Producer,
    ) -> Self {
        Self {
            name,
            path: path.into(),
            space,
            produced_by,
            valid: false,
        }
    }
}
