//! Transform - spatial mapping between two coordinate spaces

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{CoordinateSpace, TransformName};

/// Transform kind
///
/// `Affine` and `Warp` are what registration tools write; the `Inverse*`
/// kinds only appear in resolved chains when an edge is walked backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    Affine,
    Warp,
    InverseAffine,
    InverseWarp,
}

impl TransformKind {
    /// Kind of the same transform walked in the opposite direction
    pub fn inverted(self) -> Self {
        match self {
            Self::Affine => Self::InverseAffine,
            Self::Warp => Self::InverseWarp,
            Self::InverseAffine => Self::Affine,
            Self::InverseWarp => Self::Warp,
        }
    }

    pub fn is_inverse(self) -> bool {
        matches!(self, Self::InverseAffine | Self::InverseWarp)
    }

    pub fn is_affine(self) -> bool {
        matches!(self, Self::Affine | Self::InverseAffine)
    }
}

/// A named, directional spatial transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub name: TransformName,

    /// Space of the points/images the transform is applied to
    pub source_space: CoordinateSpace,

    /// Space the result lives in
    pub target_space: CoordinateSpace,

    pub kind: TransformKind,

    /// File holding the transform parameters (matrix or displacement field)
    pub path: PathBuf,

    /// Separate inverse displacement field, for warps that come with one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_path: Option<PathBuf>,
}

impl Transform {
    pub fn new(
        name: TransformName,
        source_space: CoordinateSpace,
        target_space: CoordinateSpace,
        kind: TransformKind,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name,
            source_space,
            target_space,
            kind,
            path: path.into(),
            inverse_path: None,
        }
    }

    /// Attach an inverse displacement field
    pub fn with_inverse(mut self, path: impl Into<PathBuf>) -> Self {
        self.inverse_path = Some(path.into());
        self
    }

    /// The same transform applied in the opposite direction
    ///
    /// Returns `None` for a warp without an inverse field, which cannot be
    /// walked backwards.
    pub fn inverted(&self) -> Option<Transform> {
        let path = match self.kind {
            TransformKind::Affine | TransformKind::InverseAffine => self.path.clone(),
            TransformKind::Warp => self.inverse_path.clone()?,
            TransformKind::InverseWarp => self.inverse_path.clone()?,
        };
        Some(Transform {
            name: self.name.clone(),
            source_space: self.target_space,
            target_space: self.source_space,
            kind: self.kind.inverted(),
            path,
            inverse_path: Some(self.path.clone()),
        })
    }
}
