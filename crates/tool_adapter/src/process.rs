//! ProcessToolAdapter - runs tools as child processes

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use contracts::{PipelineError, ToolAdapter, ToolInvocation, ToolOutput, ToolsConfig};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

/// Adapter that spawns the real neuroimaging tools
///
/// Program names are resolved through `PATH` unless overridden in the
/// configuration; the configured environment (thread counts, FSL output
/// type, ...) is added to every call.
#[derive(Debug, Clone, Default)]
pub struct ProcessToolAdapter {
    programs: BTreeMap<String, String>,
    env: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
}

impl ProcessToolAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter configured from the `[tools]` section
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            programs: tools.programs.clone(),
            env: tools
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            working_dir: None,
        }
    }

    /// Run every tool from this directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_program(mut self, program: &str, executable: &str) -> Self {
        self.programs
            .insert(program.to_string(), executable.to_string());
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    fn resolve<'a>(&'a self, program: &'a str) -> &'a str {
        self.programs
            .get(program)
            .map(String::as_str)
            .unwrap_or(program)
    }
}

impl ToolAdapter for ProcessToolAdapter {
    fn name(&self) -> &str {
        "process"
    }

    #[instrument(
        name = "tool_invoke",
        skip(self, invocation),
        fields(stage = %invocation.stage_id, program = %invocation.program)
    )]
    async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolOutput, PipelineError> {
        let executable = self.resolve(&invocation.program);

        let mut cmd = Command::new(executable);
        cmd.args(&invocation.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        info!(command = %invocation.command_line(), "Starting tool");
        let start = Instant::now();
        let output = cmd
            .output()
            .await
            .map_err(|e| PipelineError::tool_launch(executable, e.to_string()))?;
        let duration = start.elapsed();

        let result = ToolOutput {
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration,
        };

        if result.success {
            debug!(elapsed_ms = duration.as_millis() as u64, "Tool finished");
        } else {
            warn!(
                exit_code = ?result.exit_code,
                elapsed_ms = duration.as_millis() as u64,
                "Tool failed"
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(program: &str, args: &[&str]) -> ToolInvocation {
        ToolInvocation {
            stage_id: "test_stage".into(),
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            outputs: vec![],
            env: vec![],
        }
    }

    #[tokio::test]
    async fn test_successful_tool() {
        let adapter = ProcessToolAdapter::new();
        let out = adapter
            .invoke(&invocation("sh", &["-c", "echo done"]))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.exit_code, Some(0));
        assert_eq!(out.stdout.trim(), "done");
    }

    #[tokio::test]
    async fn test_failure_keeps_stderr_verbatim() {
        let adapter = ProcessToolAdapter::new();
        let out = adapter
            .invoke(&invocation("sh", &["-c", "echo 'Exception caught' >&2; exit 3"]))
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr, "Exception caught\n");
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let adapter = ProcessToolAdapter::new();
        let err = adapter
            .invoke(&invocation("/nonexistent/antsRegistration", &[]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::ToolLaunch { .. }));
    }

    #[tokio::test]
    async fn test_program_override_and_env() {
        let adapter = ProcessToolAdapter::new()
            .with_program("tckgen", "sh")
            .with_env("OMP_NUM_THREADS", "8");
        let out = adapter
            .invoke(&invocation("tckgen", &["-c", "test \"$OMP_NUM_THREADS\" = 8"]))
            .await
            .unwrap();
        assert!(out.success, "stderr: {}", out.stderr);
    }

    #[tokio::test]
    async fn test_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let adapter = ProcessToolAdapter::new().with_working_dir(dir.path());
        adapter
            .invoke(&invocation("sh", &["-c", "echo x > marker"]))
            .await
            .unwrap();
        assert!(dir.path().join("marker").exists());
    }
}
