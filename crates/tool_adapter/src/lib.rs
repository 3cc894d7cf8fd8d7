//! # Tool Adapter
//!
//! Implementations of [`contracts::ToolAdapter`]:
//! - [`ProcessToolAdapter`] spawns the real programs (ANTs, MRtrix3, FSL)
//! - [`MockToolAdapter`] scripts outcomes for tests and dry runs
//!
//! Adapters run a call exactly once and never retry.

mod mock;
mod process;

pub use mock::{MockBehavior, MockConfig, MockToolAdapter};
pub use process::ProcessToolAdapter;
