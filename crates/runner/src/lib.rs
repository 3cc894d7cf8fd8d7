//! # Runner
//!
//! Executes a validated pipeline for one subject, or for many.
//!
//! Per stage the runner checks preconditions against the subject's
//! artifact store and transform registry, renders the argument template,
//! hands the invocation to a [`contracts::ToolAdapter`], then validates and
//! records what the stage produced:
//!
//! ```text
//! Pending ─┬─> Skipped (outputs complete | upstream failed | halted | aborted)
//!          ├─> Failed  (unsatisfied dependency)
//!          └─> Running ─┬─> Succeeded
//!                       └─> Failed (tool failure | incomplete output)
//! ```
//!
//! Stages never run concurrently within a subject; the batch driver runs
//! independent subjects side by side.

mod abort;
mod batch;
mod render;
mod report;
mod runner;
mod session;

pub use abort::AbortSignal;
pub use batch::{discover_subjects, run_batch, BatchReport, SubjectOutcome};
pub use report::{RunReport, EXIT_ABORTED};
pub use runner::{PipelineRunner, PlannedStage};
pub use session::SubjectSession;
