//! Node-local probe execution as child processes.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::r#trait::{ExecError, ExecResult, ScriptExecutor};

/// Executes probes as child processes of the agent.
///
/// The child is killed when the execution future is dropped, which is how
/// script workers cancel probes on removal or timeout.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    /// Creates a new process executor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ScriptExecutor for ProcessExecutor {
    async fn exec(&self, command: &str, args: &[String]) -> Result<ExecResult, ExecError> {
        let output = Command::new(command)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ExecError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);

        Ok(ExecResult {
            output: combined,
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}
