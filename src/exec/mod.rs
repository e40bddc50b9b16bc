//! Script execution for probe commands.
//!
//! Script checks run an external command and report its exit code. The
//! [`ScriptExecutor`] trait abstracts over where the command runs (directly
//! on the node, inside a workload's sandbox, ...); [`ProcessExecutor`] is the
//! node-local implementation built on `tokio::process`.

mod process;
mod r#trait;

pub use process::ProcessExecutor;
pub use r#trait::{ExecError, ExecResult, ScriptExecutor};
