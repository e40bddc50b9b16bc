//! Script-check runners.
//!
//! Each script check gets an independent worker that executes the probe on
//! an interval and heartbeats the corresponding TTL check in the remote
//! registry. Workers run immediately on start, honour a per-execution
//! timeout, and deduplicate heartbeat-failure logs so a flapping registry
//! does not flood the log.
//!
//! Shutdown and removal differ: when the reconciler shuts down the worker
//! runs one final probe and heartbeat before exiting, but when its check is
//! deregistered the worker exits as soon as it observes the cancellation,
//! abandoning any in-flight result without heartbeating.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exec::ScriptExecutor;
use crate::registry::{HealthStatus, RegistryAgent};

/// Maps a probe exit code to a registry health status.
fn exit_code_status(exit_code: i32) -> HealthStatus {
    match exit_code {
        0 => HealthStatus::Passing,
        1 => HealthStatus::Warning,
        _ => HealthStatus::Critical,
    }
}

/// A live reference to a running script worker.
pub(crate) struct ScriptHandle {
    cancel: CancellationToken,
    done: JoinHandle<()>,
}

impl ScriptHandle {
    /// Signals the worker to stop. The worker will not heartbeat again.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves when the worker has exited.
    pub(crate) async fn wait(self) {
        let _ = self.done.await;
    }
}

/// A script check definition: the probe command plus the interfaces needed
/// to run it and heartbeat its TTL check.
#[derive(Clone)]
pub(crate) struct ScriptCheck {
    check_id: String,
    name: String,
    command: String,
    args: Vec<String>,
    interval: Duration,
    timeout: Duration,
    exec: Arc<dyn ScriptExecutor>,
    agent: Arc<dyn RegistryAgent>,
    shutdown: CancellationToken,
}

impl ScriptCheck {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        check_id: String,
        name: String,
        command: String,
        args: Vec<String>,
        interval: Duration,
        timeout: Duration,
        exec: Arc<dyn ScriptExecutor>,
        agent: Arc<dyn RegistryAgent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            check_id,
            name,
            command,
            args,
            interval,
            timeout,
            exec,
            agent,
            shutdown,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.check_id
    }

    /// Starts the worker for this check and returns its handle.
    ///
    /// The first probe runs immediately; subsequent probes run once per
    /// interval.
    pub(crate) fn run(&self) -> ScriptHandle {
        let cancel = CancellationToken::new();
        let worker = self.clone();
        let token = cancel.clone();
        let done = tokio::spawn(async move { worker.worker_loop(token).await });
        ScriptHandle { cancel, done }
    }

    async fn worker_loop(self, cancel: CancellationToken) {
        debug!(check = %self.name, check_id = %self.check_id, "script check worker starting");

        // Start logging heartbeat trouble on the first failure.
        let mut last_ok = true;
        let mut next_run = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Check removed.
                    return;
                }
                _ = self.shutdown.cancelled() => {
                    // Wake up, but run one more probe and heartbeat before
                    // exiting at the bottom of the loop.
                }
                _ = tokio::time::sleep_until(next_run) => {
                    next_run = Instant::now() + self.interval;
                }
            }

            let execution = tokio::select! {
                _ = cancel.cancelled() => {
                    // Removed during execution; abandon the result.
                    return;
                }
                result = tokio::time::timeout(
                    self.timeout,
                    self.exec.exec(&self.command, &self.args),
                ) => result,
            };

            let (status, output) = match execution {
                Ok(Ok(result)) => (
                    exit_code_status(result.exit_code),
                    String::from_utf8_lossy(&result.output).into_owned(),
                ),
                Ok(Err(err)) => (HealthStatus::Critical, err.to_string()),
                Err(_) => {
                    // Deadline exceeded is logged every time, not deduplicated.
                    last_ok = false;
                    warn!(
                        check = %self.name,
                        timeout = ?self.timeout,
                        "script check timed out"
                    );
                    (
                        HealthStatus::Critical,
                        format!("script timed out after {:?}", self.timeout),
                    )
                }
            };

            let heartbeat = tokio::select! {
                _ = cancel.cancelled() => {
                    // Removed; don't report.
                    return;
                }
                result = self.agent.update_ttl(&self.check_id, &output, status) => result,
            };

            match heartbeat {
                Err(err) if last_ok => {
                    last_ok = false;
                    warn!(check = %self.name, error = %err, "ttl heartbeat failed");
                }
                Err(err) => {
                    debug!(check = %self.name, error = %err, "ttl heartbeat still failing");
                }
                Ok(()) if !last_ok => {
                    last_ok = true;
                    info!(check = %self.name, "ttl heartbeat recovered");
                }
                Ok(()) => {}
            }

            if self.shutdown.is_cancelled() {
                // Final heartbeat sent.
                return;
            }
        }
    }
}
