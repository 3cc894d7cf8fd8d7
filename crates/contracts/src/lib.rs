//! # Contracts
//!
//! Frozen interface contracts shared by every pipeline crate: identifiers,
//! coordinate spaces, artifacts, transforms, stage declarations, run records,
//! configuration and the external tool interface.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Data Model
//! - Data moves between stages only as named, file-backed artifacts and transforms
//! - Artifact paths are deterministic per (subject, artifact) so a file's
//!   presence doubles as its completion marker

mod artifact;
mod blueprint;
mod error;
mod ids;
mod run;
mod space;
mod stage;
mod tool;
mod transform;

pub use artifact::*;
pub use blueprint::*;
pub use error::*;
pub use ids::{ArtifactName, StageId, SubjectId, TransformName};
pub use run::*;
pub use space::*;
pub use stage::*;
pub use tool::{LocalToolAdapter, ToolAdapter, ToolInvocation, ToolOutput};
pub use transform::*;
