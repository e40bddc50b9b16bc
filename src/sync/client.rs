//! The service-registration sync client and its reconcile loop.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          SyncClient                             │
//! │                                                                 │
//! │  register_task / update_task ──► ┌──────────┐    ┌───────────┐  │
//! │  remove_task / register_agent    │ op queue │──► │ SyncDaemon│  │
//! │  (translate + enqueue)           │ (cap 8)  │    │ (loop)    │  │
//! │                                  └──────────┘    └─────┬─────┘  │
//! │                                                        │        │
//! │                  merge ◄── desired-state maps ──► reconcile     │
//! │                                                        │        │
//! │                                          remote registry (HTTP) │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The daemon task is the sole writer of the desired-state maps: callers
//! never mutate state directly, they enqueue batches. A reconcile pass
//! diffs the maps against a fresh registry snapshot in four phases (stale
//! services, missing services, stale checks, missing checks), touching only
//! entries whose ID carries the ownership prefix. Errors abort the pass and
//! arm a linearly growing, capped retry timer.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exec::ScriptExecutor;
use crate::registry::{CheckRegistration, RegistryAgent, RegistryError, ServiceRegistration};
use crate::workload::{CheckKind, Service, ServiceCheck, Task};

use super::ids::{make_agent_service_id, make_task_service_id, is_owned_id, AgentRole};
use super::ops::Ops;
use super::script::{ScriptCheck, ScriptHandle};
use super::translate::{create_check_reg, split_host_port, TranslateError};

// =============================================================================
// Configuration
// =============================================================================

/// How quickly to retry a failed reconcile pass. Grows linearly with the
/// consecutive failure count, up to the max.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Cap on the reconcile retry backoff.
pub const DEFAULT_MAX_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// How long `shutdown` blocks waiting for outstanding operations to sync
/// and script workers to exit.
pub const DEFAULT_SHUTDOWN_WAIT: Duration = Duration::from_secs(60);

/// Capacity of the operation queue. All producers are node-local, so a full
/// queue simply slows them down.
pub const DEFAULT_OP_CHANNEL_CAPACITY: usize = 8;

/// Configuration for the sync client.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base retry interval after a failed reconcile pass.
    pub retry_interval: Duration,

    /// Cap on the retry backoff.
    pub max_retry_interval: Duration,

    /// Single wall-clock deadline shared by both shutdown waits.
    pub shutdown_wait: Duration,

    /// Operation queue capacity.
    pub op_channel_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_retry_interval: DEFAULT_MAX_RETRY_INTERVAL,
            shutdown_wait: DEFAULT_SHUTDOWN_WAIT,
            op_channel_capacity: DEFAULT_OP_CHANNEL_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Sets a custom retry interval.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Sets a custom retry cap.
    pub fn with_max_retry_interval(mut self, interval: Duration) -> Self {
        self.max_retry_interval = interval;
        self
    }

    /// Sets a custom shutdown deadline.
    pub fn with_shutdown_wait(mut self, wait: Duration) -> Self {
        self.shutdown_wait = wait;
        self
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced to callers of the sync client.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A declaration could not be translated into registrations.
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// The sync loop did not finish its outstanding operations in time.
    #[error("timed out waiting for registry operations to complete")]
    LoopShutdownTimeout,

    /// Script workers did not exit before the shutdown deadline.
    #[error("timed out waiting for script checks to exit")]
    ScriptShutdownTimeout,
}

// =============================================================================
// Sync Client
// =============================================================================

/// Agent-scoped entries recorded for deregistration on shutdown.
#[derive(Default)]
struct AgentEntries {
    services: HashSet<String>,
    checks: HashSet<String>,
}

/// Handles service and check registration with the remote registry.
///
/// Translation happens synchronously in the caller; registry communication
/// is asynchronous (see [`SyncDaemon::run`]). The daemon task is spawned by
/// [`SyncClient::new`] and stopped by [`SyncClient::shutdown`].
pub struct SyncClient {
    /// Registry interface shared with script workers.
    registry: Arc<dyn RegistryAgent>,

    /// Sender half of the operation queue.
    op_tx: mpsc::Sender<Ops>,

    /// Cancelled once, at shutdown. Script workers observe it for their
    /// final heartbeat.
    shutdown: CancellationToken,

    /// Shutdown deadline shared by the loop wait and the worker waits.
    shutdown_wait: Duration,

    /// Agent-scoped IDs to deregister at shutdown. Registrations can race
    /// with shutdown, hence the lock.
    agent_entries: Mutex<AgentEntries>,

    /// Handle to the daemon task; taken by the first `shutdown` call.
    daemon: Mutex<Option<JoinHandle<HashMap<String, ScriptHandle>>>>,
}

impl SyncClient {
    /// Creates a client and starts its sync loop in a background task.
    pub fn new(registry: Arc<dyn RegistryAgent>, config: SyncConfig) -> Self {
        let (op_tx, op_rx) = mpsc::channel(config.op_channel_capacity);
        let shutdown = CancellationToken::new();

        let daemon = SyncDaemon {
            registry: Arc::clone(&registry),
            retry_interval: config.retry_interval,
            max_retry_interval: config.max_retry_interval,
            op_rx,
            services: HashMap::new(),
            checks: HashMap::new(),
            scripts: HashMap::new(),
            running_scripts: HashMap::new(),
        };

        let token = shutdown.clone();
        let daemon_handle = tokio::spawn(daemon.run(token));

        Self {
            registry,
            op_tx,
            shutdown,
            shutdown_wait: config.shutdown_wait,
            agent_entries: Mutex::new(AgentEntries::default()),
            daemon: Mutex::new(Some(daemon_handle)),
        }
    }

    /// Enqueues a batch for the sync loop.
    ///
    /// Returns false if shutdown was signalled before the batch committed;
    /// the batch is abandoned in that case.
    async fn commit(&self, ops: Ops) -> bool {
        tokio::select! {
            result = self.op_tx.send(ops) => result.is_ok(),
            _ = self.shutdown.cancelled() => false,
        }
    }

    /// Registers services for the agent itself (client or server role).
    ///
    /// Agent services store a literal `host:port` in their port label, and
    /// script checks are rejected. Registration is asynchronous; the IDs are
    /// recorded so `shutdown` can deregister them.
    pub async fn register_agent(
        &self,
        role: AgentRole,
        services: &[Service],
    ) -> Result<(), SyncError> {
        let mut ops = Ops::default();

        for service in services {
            let id = make_agent_service_id(role, service);

            // Agents don't use port labels; the label is the address.
            let (host, port) = split_host_port(&service.port_label).map_err(|reason| {
                TranslateError::InvalidHostPort {
                    name: service.name.clone(),
                    value: service.port_label.clone(),
                    reason,
                }
            })?;

            ops.reg_services.push(ServiceRegistration {
                id: id.clone(),
                name: service.name.clone(),
                tags: service.tags.clone(),
                address: host.clone(),
                port,
            });

            for check in &service.checks {
                if matches!(check.kind, CheckKind::Script { .. }) {
                    return Err(TranslateError::AgentScriptCheck {
                        service: service.name.clone(),
                    }
                    .into());
                }
                let check_id = check.check_id(&id);
                let (check_host, check_port) = match &check.port_label {
                    Some(label) => split_host_port(label).map_err(|reason| {
                        TranslateError::InvalidHostPort {
                            name: check.name.clone(),
                            value: label.clone(),
                            reason,
                        }
                    })?,
                    None => (host.clone(), port),
                };
                ops.reg_checks
                    .push(create_check_reg(&id, check_id, check, &check_host, check_port)?);
            }
        }

        let service_ids: Vec<String> = ops.reg_services.iter().map(|s| s.id.clone()).collect();
        let check_ids: Vec<String> = ops.reg_checks.iter().map(|c| c.id.clone()).collect();

        if !self.commit(ops).await {
            // Shutting down; nothing to record.
            return Ok(());
        }

        let mut entries = lock(&self.agent_entries);
        entries.services.extend(service_ids);
        entries.checks.extend(check_ids);
        Ok(())
    }

    /// Registers all of a task's services and checks.
    ///
    /// `exec` must be supplied when the task declares script checks. Actual
    /// registry communication happens asynchronously in the sync loop.
    pub async fn register_task(
        &self,
        alloc_id: &str,
        task: &Task,
        exec: Option<Arc<dyn ScriptExecutor>>,
    ) -> Result<(), SyncError> {
        let mut ops = Ops::default();
        for service in &task.services {
            self.service_regs(&mut ops, alloc_id, service, exec.as_ref(), task)?;
        }
        self.commit(ops).await;
        Ok(())
    }

    /// Applies a task update by diffing service IDs.
    ///
    /// Services absent from the new task are deregistered with their checks.
    /// Services present in both are left alone at the service level, but
    /// their check sets are diffed. Services only in the new task are
    /// registered fresh.
    pub async fn update_task(
        &self,
        alloc_id: &str,
        existing: &Task,
        updated: &Task,
        exec: Option<Arc<dyn ScriptExecutor>>,
    ) -> Result<(), SyncError> {
        let mut ops = Ops::default();

        let existing_ids: HashMap<String, &Service> = existing
            .services
            .iter()
            .map(|s| (make_task_service_id(alloc_id, &existing.name, s), s))
            .collect();
        let mut new_ids: HashMap<String, &Service> = updated
            .services
            .iter()
            .map(|s| (make_task_service_id(alloc_id, &updated.name, s), s))
            .collect();

        for (existing_id, existing_svc) in &existing_ids {
            let Some(new_svc) = new_ids.remove(existing_id) else {
                // Service removed in the update.
                ops.dereg_services.push(existing_id.clone());
                for check in &existing_svc.checks {
                    ops.dereg_checks.push(check.check_id(existing_id));
                }
                continue;
            };

            // Same ID means the service itself is unchanged; diff its checks.
            let mut existing_checks: HashSet<String> = existing_svc
                .checks
                .iter()
                .map(|c| c.check_id(existing_id))
                .collect();

            for check in &new_svc.checks {
                let check_id = check.check_id(existing_id);
                if existing_checks.remove(&check_id) {
                    continue;
                }

                // New check on an existing service.
                if let CheckKind::Script { command, args } = &check.kind {
                    let exec = exec.as_ref().ok_or(TranslateError::ScriptUnsupported)?;
                    ops.scripts.push(self.script_check(
                        check_id.clone(),
                        check,
                        command.clone(),
                        args.clone(),
                        exec,
                    ));
                }
                let (host, port) = self.resolve_check_addr(updated, existing_svc, check)?;
                ops.reg_checks
                    .push(create_check_reg(existing_id, check_id, check, &host, port)?);
            }

            // Checks absent from the updated service.
            for check_id in existing_checks {
                ops.dereg_checks.push(check_id);
            }
        }

        // Services only present in the updated task.
        for (_, new_svc) in new_ids {
            self.service_regs(&mut ops, alloc_id, new_svc, exec.as_ref(), updated)?;
        }

        self.commit(ops).await;
        Ok(())
    }

    /// Deregisters all of a task's services and checks.
    pub async fn remove_task(&self, alloc_id: &str, task: &Task) {
        let mut ops = Ops::default();

        for service in &task.services {
            let id = make_task_service_id(alloc_id, &task.name, service);
            for check in &service.checks {
                ops.dereg_checks.push(check.check_id(&id));
            }
            ops.dereg_services.push(id);
        }

        self.commit(ops).await;
    }

    /// Shuts the client down.
    ///
    /// Deregisters agent-scoped entries, signals the loop, and waits up to
    /// the shutdown deadline for outstanding operations to sync and for
    /// script workers to exit. The single deadline covers both waits. The
    /// reconciler counts as stopped even when a timeout is returned.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        let handle = lock(&self.daemon).take();
        let Some(handle) = handle else {
            // Already shut down.
            return Ok(());
        };

        // Deregister agent entries first so the loop's drain pass sees the
        // batch before the shutdown signal.
        let mut ops = Ops::default();
        {
            let entries = lock(&self.agent_entries);
            ops.dereg_services.extend(entries.services.iter().cloned());
            ops.dereg_checks.extend(entries.checks.iter().cloned());
        }
        self.commit(ops).await;

        self.shutdown.cancel();

        let deadline = Instant::now() + self.shutdown_wait;

        // Wait for the loop to sync outstanding operations and exit.
        let running_scripts = match tokio::time::timeout_at(deadline, handle).await {
            Ok(Ok(running_scripts)) => running_scripts,
            Ok(Err(join_err)) => {
                error!(error = %join_err, "sync loop task panicked during shutdown");
                return Ok(());
            }
            Err(_) => return Err(SyncError::LoopShutdownTimeout),
        };

        // Give script workers the remainder of the deadline to finish their
        // final heartbeat.
        for (_, script) in running_scripts {
            if tokio::time::timeout_at(deadline, script.wait()).await.is_err() {
                return Err(SyncError::ScriptShutdownTimeout);
            }
        }

        Ok(())
    }

    /// Builds the service and check registrations for one declared service.
    fn service_regs(
        &self,
        ops: &mut Ops,
        alloc_id: &str,
        service: &Service,
        exec: Option<&Arc<dyn ScriptExecutor>>,
        task: &Task,
    ) -> Result<(), TranslateError> {
        let id = make_task_service_id(alloc_id, &task.name, service);
        let (host, port) = task.find_host_and_port_for(&service.port_label).ok_or_else(|| {
            TranslateError::UnknownPortLabel {
                label: service.port_label.clone(),
                name: service.name.clone(),
            }
        })?;

        ops.reg_services.push(ServiceRegistration {
            id: id.clone(),
            name: service.name.clone(),
            tags: service.tags.clone(),
            address: host.clone(),
            port,
        });

        for check in &service.checks {
            let check_id = check.check_id(&id);
            if let CheckKind::Script { command, args } = &check.kind {
                let exec = exec.ok_or(TranslateError::ScriptUnsupported)?;
                ops.scripts.push(self.script_check(
                    check_id.clone(),
                    check,
                    command.clone(),
                    args.clone(),
                    exec,
                ));
            }
            let (check_host, check_port) = match &check.port_label {
                Some(label) => task.find_host_and_port_for(label).ok_or_else(|| {
                    TranslateError::UnknownPortLabel {
                        label: label.clone(),
                        name: check.name.clone(),
                    }
                })?,
                None => (host.clone(), port),
            };
            ops.reg_checks
                .push(create_check_reg(&id, check_id, check, &check_host, check_port)?);
        }
        Ok(())
    }

    fn script_check(
        &self,
        check_id: String,
        check: &ServiceCheck,
        command: String,
        args: Vec<String>,
        exec: &Arc<dyn ScriptExecutor>,
    ) -> ScriptCheck {
        ScriptCheck::new(
            check_id,
            check.name.clone(),
            command,
            args,
            check.interval,
            check.timeout,
            Arc::clone(exec),
            Arc::clone(&self.registry),
            self.shutdown.clone(),
        )
    }

    fn resolve_check_addr(
        &self,
        task: &Task,
        service: &Service,
        check: &ServiceCheck,
    ) -> Result<(String, u16), TranslateError> {
        let label = check.port_label.as_ref().unwrap_or(&service.port_label);
        task.find_host_and_port_for(label)
            .ok_or_else(|| TranslateError::UnknownPortLabel {
                label: label.clone(),
                name: check.name.clone(),
            })
    }
}

/// Locks a mutex, recovering the data from a poisoned lock.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =============================================================================
// Sync Daemon
// =============================================================================

/// The loop task owning the desired-state store.
///
/// Nothing outside `run` ever reads or writes these maps, so no locking is
/// needed: the queue plus a single writer makes every reconcile internally
/// serial.
struct SyncDaemon {
    registry: Arc<dyn RegistryAgent>,
    retry_interval: Duration,
    max_retry_interval: Duration,
    op_rx: mpsc::Receiver<Ops>,

    services: HashMap<String, ServiceRegistration>,
    checks: HashMap<String, CheckRegistration>,
    scripts: HashMap<String, ScriptCheck>,
    running_scripts: HashMap<String, ScriptHandle>,
}

impl SyncDaemon {
    /// Runs the loop until shutdown, then drains the queue, reconciles once
    /// more, and returns the handles of still-running script workers.
    async fn run(mut self, shutdown: CancellationToken) -> HashMap<String, ScriptHandle> {
        debug!("registry sync loop starting");

        let mut failures: u32 = 0;
        let mut retry_at: Option<Instant> = None;

        loop {
            let retry = async move {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = retry => {
                    retry_at = None;
                }
                _ = shutdown.cancelled() => {}
                Some(ops) = self.op_rx.recv() => {
                    self.merge(ops);
                }
            }

            match self.reconcile().await {
                Ok(()) => {
                    if failures > 0 {
                        info!("successfully updated services in registry");
                        failures = 0;
                    }
                }
                Err(err) => {
                    if failures == 0 {
                        warn!(error = %err, "failed to update services in registry");
                    }
                    failures += 1;
                    let backoff =
                        backoff_for(failures, self.retry_interval, self.max_retry_interval);
                    retry_at = Some(Instant::now() + backoff);
                }
            }

            if shutdown.is_cancelled() {
                // Exit only after syncing all outstanding operations.
                let mut drained = false;
                while let Ok(ops) = self.op_rx.try_recv() {
                    self.merge(ops);
                    drained = true;
                }
                if !drained {
                    break;
                }
            }
        }

        debug!("registry sync loop stopped");
        self.running_scripts
    }

    /// Merges a batch into the desired-state store.
    ///
    /// Registrations apply before deregistrations; deregistering a check
    /// cancels its running script worker and drops the script definition.
    /// The registry is never touched here.
    fn merge(&mut self, ops: Ops) {
        for service in ops.reg_services {
            self.services.insert(service.id.clone(), service);
        }
        for check in ops.reg_checks {
            self.checks.insert(check.id.clone(), check);
        }
        for script in ops.scripts {
            self.scripts.insert(script.id().to_string(), script);
        }
        for service_id in ops.dereg_services {
            self.services.remove(&service_id);
        }
        for check_id in ops.dereg_checks {
            if let Some(handle) = self.running_scripts.remove(&check_id) {
                handle.cancel();
            }
            self.scripts.remove(&check_id);
            self.checks.remove(&check_id);
        }
    }

    /// One reconcile pass against fresh registry snapshots.
    ///
    /// Any registry error aborts the pass; retrying from the top is safe
    /// because every action is idempotent with respect to the remote ID set.
    async fn reconcile(&mut self) -> Result<(), RegistryError> {
        let mut sreg = 0;
        let mut creg = 0;
        let mut sdereg = 0;
        let mut cdereg = 0;

        let remote_services = self.registry.list_services().await?;
        let remote_checks = self.registry.list_checks().await?;

        // Remove owned services in the registry but unknown locally.
        for id in remote_services.keys() {
            if self.services.contains_key(id) {
                continue;
            }
            if !is_owned_id(id) {
                // Managed by some other party.
                continue;
            }
            self.registry.deregister_service(id).await?;
            sdereg += 1;
        }

        // Register local services missing from the registry. Services
        // already present are not updated: any meaningful change produces
        // a different ID.
        for (id, service) in &self.services {
            if remote_services.contains_key(id) {
                continue;
            }
            self.registry.register_service(service).await?;
            sreg += 1;
        }

        // Remove owned checks in the registry but unknown locally.
        for (id, check) in &remote_checks {
            if self.checks.contains_key(id) {
                continue;
            }
            if !is_owned_id(&check.service_id) {
                continue;
            }
            self.registry.deregister_check(id).await?;
            cdereg += 1;
        }

        // Register local checks missing from the registry and start script
        // workers for newly installed script checks.
        for (id, check) in &self.checks {
            if remote_checks.contains_key(id) {
                continue;
            }
            self.registry.register_check(check).await?;
            creg += 1;

            if let Some(script) = self.scripts.get(id) {
                if self.running_scripts.contains_key(id) {
                    continue;
                }
                self.running_scripts.insert(id.clone(), script.run());
            }
        }

        debug!(
            registered_services = sreg,
            registered_checks = creg,
            deregistered_services = sdereg,
            deregistered_checks = cdereg,
            "registry sync complete"
        );
        Ok(())
    }
}

/// Backoff after `failures` consecutive reconcile failures: linear in the
/// failure count, capped at `max`.
fn backoff_for(failures: u32, retry_interval: Duration, max: Duration) -> Duration {
    retry_interval.saturating_mul(failures).min(max)
}
