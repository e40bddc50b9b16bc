//! The script executor interface consumed by script-check workers.

use async_trait::async_trait;
use thiserror::Error;

/// Outcome of one probe execution.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Combined stdout and stderr of the probe.
    pub output: Vec<u8>,

    /// Exit code; `-1` when the process was terminated by a signal.
    pub exit_code: i32,
}

/// Errors from launching a probe.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command could not be started.
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs probe commands on behalf of script checks.
///
/// Implementations must stop the probe when the returned future is dropped;
/// the script runner cancels executions by dropping them.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Runs the command to completion and returns its output and exit code.
    async fn exec(&self, command: &str, args: &[String]) -> Result<ExecResult, ExecError>;
}
