//! MockToolAdapter - scripted tool behaviour for tests and dry runs
//!
//! Records every invocation and, unless told otherwise, writes each declared
//! output file so the runner sees a successful stage.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{PipelineError, StageId, ToolAdapter, ToolInvocation, ToolOutput};
use tracing::instrument;

/// Scripted outcome of one stage
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Exit non-zero with the given stderr, writing nothing
    Fail { exit_code: i32, stderr: String },
    /// Exit zero but leave declared outputs as zero-length files
    EmptyOutputs,
    /// Exit zero without writing any output
    NoOutputs,
    /// The program cannot be started
    LaunchError,
}

/// Mock configuration (failure injection per stage)
#[derive(Debug, Default, Clone)]
pub struct MockConfig {
    pub behaviors: HashMap<StageId, MockBehavior>,
}

/// Adapter that never starts a process
#[derive(Debug, Default)]
pub struct MockToolAdapter {
    config: MockConfig,
    invocations: Mutex<Vec<ToolInvocation>>,
    /// Stages whose scripted behaviour applies only to their first call
    once: Mutex<HashSet<StageId>>,
}

impl MockToolAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MockConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Script a stage to exit with `exit_code` and `stderr`
    pub fn fail_stage(self, stage: &str, exit_code: i32, stderr: &str) -> Self {
        self.script(
            stage,
            MockBehavior::Fail {
                exit_code,
                stderr: stderr.to_string(),
            },
        )
    }

    pub fn empty_outputs(self, stage: &str) -> Self {
        self.script(stage, MockBehavior::EmptyOutputs)
    }

    pub fn no_outputs(self, stage: &str) -> Self {
        self.script(stage, MockBehavior::NoOutputs)
    }

    pub fn launch_error(self, stage: &str) -> Self {
        self.script(stage, MockBehavior::LaunchError)
    }

    pub fn script(mut self, stage: &str, behavior: MockBehavior) -> Self {
        self.config.behaviors.insert(stage.into(), behavior);
        self
    }

    /// Apply the scripted behaviour of `stage` only to its first call
    pub fn only_once(self, stage: &str) -> Self {
        lock(&self.once).insert(stage.into());
        self
    }

    /// Every invocation so far, in call order
    pub fn invocations(&self) -> Vec<ToolInvocation> {
        lock(&self.invocations).clone()
    }

    pub fn invocation_count(&self) -> usize {
        lock(&self.invocations).len()
    }

    /// Stage ids in call order
    pub fn invoked_stages(&self) -> Vec<StageId> {
        lock(&self.invocations)
            .iter()
            .map(|inv| inv.stage_id.clone())
            .collect()
    }

    pub fn was_invoked(&self, stage: &str) -> bool {
        lock(&self.invocations).iter().any(|inv| inv.stage_id == stage)
    }

    pub fn clear(&self) {
        lock(&self.invocations).clear();
    }

    fn behavior_for(&self, stage: &StageId) -> Option<MockBehavior> {
        let behavior = self.config.behaviors.get(stage)?.clone();
        let mut once = lock(&self.once);
        if once.contains(stage) {
            let calls = lock(&self.invocations)
                .iter()
                .filter(|inv| &inv.stage_id == stage)
                .count();
            // The current call is already recorded
            if calls > 1 {
                once.remove(stage);
                return None;
            }
        }
        Some(behavior)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn write_outputs(invocation: &ToolInvocation, content: &[u8]) -> Result<(), PipelineError> {
    for path in &invocation.outputs {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content).await?;
    }
    Ok(())
}

impl ToolAdapter for MockToolAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    #[instrument(
        name = "mock_tool_invoke",
        skip(self, invocation),
        fields(stage = %invocation.stage_id, program = %invocation.program)
    )]
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolOutput, PipelineError> {
        lock(&self.invocations).push(invocation.clone());

        let output = match self.behavior_for(&invocation.stage_id) {
            Some(MockBehavior::Fail { exit_code, stderr }) => ToolOutput::failed(exit_code, stderr),
            Some(MockBehavior::LaunchError) => {
                return Err(PipelineError::tool_launch(
                    &invocation.program,
                    "mock launch failure",
                ));
            }
            Some(MockBehavior::EmptyOutputs) => {
                write_outputs(invocation, b"").await?;
                ToolOutput::succeeded()
            }
            Some(MockBehavior::NoOutputs) => ToolOutput::succeeded(),
            None => {
                let content = format!("mock output of {}\n", invocation.stage_id);
                write_outputs(invocation, content.as_bytes()).await?;
                ToolOutput::succeeded()
            }
        };

        Ok(ToolOutput {
            stdout: invocation.command_line(),
            duration: Duration::from_millis(1),
            ..output
        })
    }
}
