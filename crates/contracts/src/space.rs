//! Coordinate spaces and output modalities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference frame an image is represented in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateSpace {
    /// Subject-native anatomical (T1w) space
    Native,
    /// Standard template space
    Mni,
    /// Diffusion-native space, defined by the mean b=0 volume
    DwiB0,
}

impl CoordinateSpace {
    pub const ALL: [CoordinateSpace; 3] = [Self::Native, Self::Mni, Self::DwiB0];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Mni => "mni",
            Self::DwiB0 => "dwi_b0",
        }
    }
}

impl fmt::Display for CoordinateSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derivatives sub-directory a stage writes into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Anat,
    Dwi,
}

impl Modality {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Anat => "anat",
            Self::Dwi => "dwi",
        }
    }
}

/// BIDS datatype directory of a raw input file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidsDatatype {
    Anat,
    Dwi,
    Fmap,
}

impl BidsDatatype {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Anat => "anat",
            Self::Dwi => "dwi",
            Self::Fmap => "fmap",
        }
    }
}
