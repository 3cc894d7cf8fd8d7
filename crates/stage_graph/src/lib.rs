//! # Stage Graph
//!
//! Declared pipeline stages and their validation.
//!
//! Responsibilities:
//! - Validate a [`PipelineDefinition`](contracts::PipelineDefinition) once,
//!   before any tool runs (unique producers, no unknown or forward
//!   references, no cycles, consistent argument templates)
//! - Answer producer and dependency queries for the runner
//! - Declare the structural connectome pipeline
//!
//! # Example
//!
//! ```no_run
//! use config_loader::ConfigLoader;
//! use stage_graph::{connectome, StageGraph};
//! use std::path::Path;
//!
//! let blueprint = ConfigLoader::load_from_path(Path::new("pipeline.toml")).unwrap();
//! let graph = StageGraph::new(connectome::definition(&blueprint)).unwrap();
//! for stage in graph.stages() {
//!     println!("{} <- {:?}", stage.id, graph.dependencies(&stage.id));
//! }
//! ```

pub mod connectome;
mod graph;

pub use graph::StageGraph;
