//! # Transform Registry
//!
//! Spatial transforms of one subject and their composition.
//!
//! Transforms are directed edges between coordinate spaces
//! (Native, MNI, DWI_B0). `resolve(from, to)` finds a chain across any
//! number of hops, walking edges backwards through inverses where the
//! transform files allow it.
//!
//! # Example
//!
//! ```
//! use contracts::{CoordinateSpace, TransformKind};
//! use transform_registry::TransformRegistry;
//!
//! let mut registry = TransformRegistry::new();
//! registry
//!     .register(
//!         "native_to_dwi_affine".into(),
//!         CoordinateSpace::Native,
//!         CoordinateSpace::DwiB0,
//!         TransformKind::Affine,
//!         "/d/sub-001_from-T1w_to-dwi_0GenericAffine.mat",
//!     )
//!     .unwrap();
//!
//! let chain = registry
//!     .resolve(CoordinateSpace::DwiB0, CoordinateSpace::Native)
//!     .unwrap();
//! assert_eq!(
//!     chain.ants_args(),
//!     vec!["-t", "[/d/sub-001_from-T1w_to-dwi_0GenericAffine.mat,1]"]
//! );
//! ```

mod chain;
mod geometry;
mod registry;

pub use chain::TransformChain;
pub use geometry::{parse_itk_affine, SpatialModel};
pub use registry::TransformRegistry;
