//! ToolAdapter trait - external tool invocation interface
//!
//! Every image-processing step is an opaque external program. The runner
//! renders a [`ToolInvocation`] and hands it to an adapter; the adapter runs
//! it once and reports the raw outcome.

use std::path::PathBuf;
use std::time::Duration;

use crate::{PipelineError, StageId};

/// Fully rendered command line of one stage
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Stage the call belongs to (logging and metrics)
    pub stage_id: StageId,

    /// Program to execute
    pub program: String,

    /// Rendered arguments
    pub args: Vec<String>,

    /// Declared output files the call is expected to write
    pub outputs: Vec<PathBuf>,

    /// Extra environment variables
    pub env: Vec<(String, String)>,
}

impl ToolInvocation {
    /// Shell-like rendering for logs and dry runs
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                line.push('\'');
                line.push_str(arg);
                line.push('\'');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

/// Raw outcome of one tool call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,

    pub success: bool,

    pub stdout: String,

    /// Captured verbatim for diagnostics
    pub stderr: String,

    pub duration: Duration,
}

impl ToolOutput {
    pub fn succeeded() -> Self {
        Self {
            exit_code: Some(0),
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(exit_code),
            success: false,
            stderr: stderr.into(),
            ..Default::default()
        }
    }
}

/// External tool adapter
///
/// Implementations hold no state between calls that affects results and
/// never retry: a failing call is reported once, as is.
#[trait_variant::make(ToolAdapter: Send)]
pub trait LocalToolAdapter {
    /// Adapter name (used for logging)
    fn name(&self) -> &str;

    /// Run the invocation to completion
    ///
    /// # Errors
    /// Only when the program cannot be started at all; a started program
    /// that fails is reported through [`ToolOutput::success`].
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolOutput, PipelineError>;
}
