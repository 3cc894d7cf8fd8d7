//! # Artifact Store
//!
//! Per-subject bookkeeping of file-backed artifacts.
//!
//! Responsibilities:
//! - Register declared artifacts as pending, flip them to valid only after
//!   the file is checked on disk
//! - Deterministic path templating for inputs, derivatives and manifests
//! - Persist the run manifest next to the derivatives
//!
//! # Example
//!
//! ```no_run
//! use artifact_store::{ArtifactStore, SubjectLayout};
//! use contracts::{CoordinateSpace, Modality, PathsConfig, Producer};
//!
//! let paths = PathsConfig {
//!     bids_root: "/data/bids".into(),
//!     derivatives_root: "/data/derivatives".into(),
//!     template_dir: "/data/templates".into(),
//! };
//! let layout = SubjectLayout::new("sub-001".into(), &paths).unwrap();
//! let mut store = ArtifactStore::new();
//! store
//!     .register(
//!         "t1w_bias_corrected".into(),
//!         layout.derivative_path(Modality::Anat, "desc-biascorrected_T1w.nii.gz"),
//!         CoordinateSpace::Native,
//!         Producer::Stage("t1w_bias_correction".into()),
//!     )
//!     .unwrap();
//! ```

mod layout;
mod manifest;
mod store;

pub use layout::SubjectLayout;
pub use manifest::RunManifest;
pub use store::ArtifactStore;
