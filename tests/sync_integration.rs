//! Integration tests for the registry sync loop.
//!
//! These tests run the full client against an in-memory mock registry and
//! verify:
//! - Ownership-gated sweeps of stale entries
//! - Installation of declared services and checks
//! - Idempotence of repeated batches
//! - Rename-on-tag-edit via task updates
//! - Script check TTL registration, heartbeating, and shutdown semantics
//! - Agent registration cleanup on shutdown
//! - Retry with backoff after registry errors

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use regsync::exec::{ExecError, ExecResult, ScriptExecutor};
use regsync::registry::{
    CheckRegistration, CheckTarget, HealthStatus, RegistryAgent, RegistryError, RemoteCheck,
    RemoteService, ServiceRegistration,
};
use regsync::sync::{AgentRole, SyncClient, SyncConfig, SyncError};
use regsync::workload::{CheckKind, Service, ServiceCheck, Task};

// =============================================================================
// Test Helpers
// =============================================================================

#[derive(Default)]
struct RegistryState {
    services: HashMap<String, RemoteService>,
    checks: HashMap<String, RemoteCheck>,
    registered_checks: Vec<CheckRegistration>,
    heartbeats: Vec<(String, String, HealthStatus)>,
}

/// In-memory registry agent with injectable snapshot failures.
#[derive(Default)]
struct MockRegistry {
    state: Mutex<RegistryState>,
    fail: AtomicBool,
}

impl MockRegistry {
    fn seed_service(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.services.insert(
            id.to_string(),
            RemoteService {
                id: id.to_string(),
                name: id.to_string(),
                tags: vec![],
                address: "10.0.0.9".to_string(),
                port: 9,
            },
        );
    }

    fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    fn has_service(&self, id: &str) -> bool {
        self.state.lock().unwrap().services.contains_key(id)
    }

    fn service_count(&self) -> usize {
        self.state.lock().unwrap().services.len()
    }

    fn check_count(&self) -> usize {
        self.state.lock().unwrap().checks.len()
    }

    fn heartbeat_count(&self) -> usize {
        self.state.lock().unwrap().heartbeats.len()
    }

    fn owned_entry_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        let services = state
            .services
            .keys()
            .filter(|id| id.starts_with("_regsync"))
            .count();
        let checks = state
            .checks
            .values()
            .filter(|c| c.service_id.starts_with("_regsync"))
            .count();
        services + checks
    }

    fn registered_ttl(&self, check_name: &str) -> Option<Duration> {
        let state = self.state.lock().unwrap();
        state
            .registered_checks
            .iter()
            .find(|c| c.name == check_name)
            .and_then(|c| match &c.target {
                CheckTarget::Ttl(ttl) => Some(*ttl),
                _ => None,
            })
    }
}

#[async_trait]
impl RegistryAgent for MockRegistry {
    async fn list_services(&self) -> Result<HashMap<String, RemoteService>, RegistryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RegistryError::Http("injected failure".to_string()));
        }
        Ok(self.state.lock().unwrap().services.clone())
    }

    async fn list_checks(&self) -> Result<HashMap<String, RemoteCheck>, RegistryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RegistryError::Http("injected failure".to_string()));
        }
        Ok(self.state.lock().unwrap().checks.clone())
    }

    async fn register_service(&self, service: &ServiceRegistration) -> Result<(), RegistryError> {
        let mut state = self.state.lock().unwrap();
        state.services.insert(
            service.id.clone(),
            RemoteService {
                id: service.id.clone(),
                name: service.name.clone(),
                tags: service.tags.clone(),
                address: service.address.clone(),
                port: service.port,
            },
        );
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str) -> Result<(), RegistryError> {
        self.state.lock().unwrap().services.remove(service_id);
        Ok(())
    }

    async fn register_check(&self, check: &CheckRegistration) -> Result<(), RegistryError> {
        let mut state = self.state.lock().unwrap();
        state.checks.insert(
            check.id.clone(),
            RemoteCheck {
                id: check.id.clone(),
                name: check.name.clone(),
                service_id: check.service_id.clone(),
                status: check.status.as_str().to_string(),
            },
        );
        state.registered_checks.push(check.clone());
        Ok(())
    }

    async fn deregister_check(&self, check_id: &str) -> Result<(), RegistryError> {
        self.state.lock().unwrap().checks.remove(check_id);
        Ok(())
    }

    async fn update_ttl(
        &self,
        check_id: &str,
        output: &str,
        status: HealthStatus,
    ) -> Result<(), RegistryError> {
        self.state.lock().unwrap().heartbeats.push((
            check_id.to_string(),
            output.to_string(),
            status,
        ));
        Ok(())
    }
}

/// Executor that records how many probes ran and always passes.
#[derive(Default)]
struct CountingExecutor {
    calls: AtomicUsize,
}

#[async_trait]
impl ScriptExecutor for CountingExecutor {
    async fn exec(&self, _command: &str, _args: &[String]) -> Result<ExecResult, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExecResult {
            output: b"ok".to_vec(),
            exit_code: 0,
        })
    }
}

fn test_config() -> SyncConfig {
    SyncConfig::default()
        .with_retry_interval(Duration::from_millis(10))
        .with_max_retry_interval(Duration::from_millis(50))
        .with_shutdown_wait(Duration::from_secs(5))
}

fn new_client(registry: &Arc<MockRegistry>) -> SyncClient {
    SyncClient::new(
        Arc::clone(registry) as Arc<dyn RegistryAgent>,
        test_config(),
    )
}

fn tcp_check(name: &str) -> ServiceCheck {
    ServiceCheck {
        name: name.to_string(),
        kind: CheckKind::Tcp,
        port_label: None,
        interval: Duration::from_secs(10),
        timeout: Duration::from_secs(2),
        initial_status: HealthStatus::Passing,
    }
}

fn script_check(name: &str) -> ServiceCheck {
    ServiceCheck {
        name: name.to_string(),
        kind: CheckKind::Script {
            command: "/bin/probe".to_string(),
            args: vec!["--fast".to_string()],
        },
        port_label: None,
        interval: Duration::from_secs(10),
        timeout: Duration::from_secs(2),
        initial_status: HealthStatus::Passing,
    }
}

fn web_task(tag: &str, checks: Vec<ServiceCheck>) -> Task {
    Task::new("web")
        .with_port("http", "10.0.0.1", 8080)
        .with_service(Service {
            name: "web".to_string(),
            port_label: "http".to_string(),
            tags: vec![tag.to_string()],
            checks,
        })
}

/// Polls a condition until it holds or the test deadline expires.
async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// =============================================================================
// Integration Tests
// =============================================================================

#[tokio::test]
async fn test_stale_owned_entries_swept_unowned_preserved() {
    let registry = Arc::new(MockRegistry::default());
    registry.seed_service("svc-foo");
    registry.seed_service("_regsync-executor-a1-web-http");

    let client = new_client(&registry);

    // An empty batch wakes the loop with an empty desired state.
    client
        .register_task("a1", &Task::new("noop"), None)
        .await
        .unwrap();

    eventually("stale owned service to be swept", || {
        !registry.has_service("_regsync-executor-a1-web-http")
    })
    .await;

    assert!(
        registry.has_service("svc-foo"),
        "entries without the ownership prefix must never be touched"
    );
}

#[tokio::test]
async fn test_register_task_installs_service_and_checks() {
    let registry = Arc::new(MockRegistry::default());
    let client = new_client(&registry);

    let task = web_task("v1", vec![tcp_check("tcp-health")]);
    client.register_task("a1", &task, None).await.unwrap();

    eventually("service registration", || {
        registry.has_service("_regsync-executor-a1-web-web-v1")
    })
    .await;
    eventually("check registration", || registry.check_count() == 1).await;

    // Applying the same batch again converges to the same state.
    client.register_task("a1", &task, None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(registry.service_count(), 1);
    assert_eq!(registry.check_count(), 1);
}

#[tokio::test]
async fn test_update_task_tag_edit_renames_service() {
    let registry = Arc::new(MockRegistry::default());
    let client = new_client(&registry);

    let v1 = web_task("v1", vec![tcp_check("tcp-health")]);
    client.register_task("a1", &v1, None).await.unwrap();
    eventually("initial registration", || {
        registry.has_service("_regsync-executor-a1-web-web-v1")
    })
    .await;

    let v2 = web_task("v2", vec![tcp_check("tcp-health")]);
    client.update_task("a1", &v1, &v2, None).await.unwrap();

    eventually("renamed service to appear", || {
        registry.has_service("_regsync-executor-a1-web-web-v2")
    })
    .await;
    eventually("old service to be deregistered", || {
        !registry.has_service("_regsync-executor-a1-web-web-v1")
    })
    .await;
    assert_eq!(registry.service_count(), 1);
}

#[tokio::test]
async fn test_update_task_diffs_checks_on_unchanged_service() {
    let registry = Arc::new(MockRegistry::default());
    let client = new_client(&registry);

    let before = web_task("v1", vec![tcp_check("old-check")]);
    client.register_task("a1", &before, None).await.unwrap();
    eventually("initial check", || registry.check_count() == 1).await;

    let after = web_task("v1", vec![tcp_check("new-check")]);
    client
        .update_task("a1", &before, &after, None)
        .await
        .unwrap();

    eventually("check set to be replaced", || {
        let state = registry.state.lock().unwrap();
        state.checks.len() == 1 && state.checks.values().any(|c| c.name == "new-check")
    })
    .await;

    // The service itself kept its ID throughout.
    assert!(registry.has_service("_regsync-executor-a1-web-web-v1"));
}

#[tokio::test]
async fn test_register_then_remove_leaves_no_owned_entries() {
    let registry = Arc::new(MockRegistry::default());
    let client = new_client(&registry);

    let task = web_task("v1", vec![tcp_check("tcp-health")]);
    client.register_task("a1", &task, None).await.unwrap();
    eventually("registration", || registry.owned_entry_count() == 2).await;

    client.remove_task("a1", &task).await;
    eventually("removal", || registry.owned_entry_count() == 0).await;
}

#[tokio::test]
async fn test_script_check_ttl_heartbeats_and_final_shutdown_probe() {
    let registry = Arc::new(MockRegistry::default());
    let executor = Arc::new(CountingExecutor::default());
    let client = new_client(&registry);

    let task = web_task("v1", vec![script_check("probe")]);
    client
        .register_task(
            "a1",
            &task,
            Some(Arc::clone(&executor) as Arc<dyn ScriptExecutor>),
        )
        .await
        .unwrap();

    // TTL is sized interval + 31s buffer.
    eventually("script check registration", || {
        registry.registered_ttl("probe").is_some()
    })
    .await;
    assert_eq!(
        registry.registered_ttl("probe"),
        Some(Duration::from_secs(41))
    );

    // The worker runs immediately and heartbeats, then sleeps on its
    // ten-second interval.
    eventually("first heartbeat", || registry.heartbeat_count() == 1).await;
    {
        let state = registry.state.lock().unwrap();
        let (_, output, status) = state.heartbeats[0].clone();
        assert_eq!(status, HealthStatus::Passing);
        assert_eq!(output, "ok");
    }

    // Shutdown wakes the sleeping worker for exactly one more probe and
    // heartbeat before its done-signal fires.
    client.shutdown().await.unwrap();
    assert_eq!(registry.heartbeat_count(), 2);
    assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_script_check_removal_cancels_worker() {
    let registry = Arc::new(MockRegistry::default());
    let executor = Arc::new(CountingExecutor::default());
    let client = new_client(&registry);

    let task = web_task("v1", vec![script_check("probe")]);
    client
        .register_task(
            "a1",
            &task,
            Some(Arc::clone(&executor) as Arc<dyn ScriptExecutor>),
        )
        .await
        .unwrap();
    eventually("first heartbeat", || registry.heartbeat_count() >= 1).await;

    client.remove_task("a1", &task).await;
    eventually("check removal", || registry.check_count() == 0).await;

    // A cancelled worker must not heartbeat again.
    let heartbeats = registry.heartbeat_count();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.heartbeat_count(), heartbeats);
}

#[tokio::test]
async fn test_agent_registration_deregistered_on_shutdown() {
    let registry = Arc::new(MockRegistry::default());
    let client = new_client(&registry);

    let agent_service = Service {
        name: "api".to_string(),
        port_label: "10.0.0.1:4648".to_string(),
        tags: vec!["serf".to_string()],
        checks: vec![],
    };
    client
        .register_agent(AgentRole::Server, &[agent_service])
        .await
        .unwrap();

    eventually("agent service registration", || {
        registry.has_service("_regsync-server-api-serf")
    })
    .await;

    client.shutdown().await.unwrap();

    assert!(
        !registry.has_service("_regsync-server-api-serf"),
        "agent entries must be deregistered at shutdown"
    );
    assert_eq!(registry.owned_entry_count(), 0);
}

#[tokio::test]
async fn test_register_agent_rejects_script_checks() {
    let registry = Arc::new(MockRegistry::default());
    let client = new_client(&registry);

    let agent_service = Service {
        name: "api".to_string(),
        port_label: "10.0.0.1:4648".to_string(),
        tags: vec![],
        checks: vec![script_check("probe")],
    };

    let result = client.register_agent(AgentRole::Server, &[agent_service]).await;
    assert!(matches!(result, Err(SyncError::Translate(_))));
}

#[tokio::test]
async fn test_register_agent_rejects_bad_port_label() {
    let registry = Arc::new(MockRegistry::default());
    let client = new_client(&registry);

    let agent_service = Service {
        name: "api".to_string(),
        port_label: "not-an-address".to_string(),
        tags: vec![],
        checks: vec![],
    };

    let result = client.register_agent(AgentRole::Server, &[agent_service]).await;
    assert!(matches!(result, Err(SyncError::Translate(_))));
}

#[tokio::test]
async fn test_register_task_unknown_port_label_errors() {
    let registry = Arc::new(MockRegistry::default());
    let client = new_client(&registry);

    // Service references a label the task never bound.
    let task = Task::new("web").with_service(Service {
        name: "web".to_string(),
        port_label: "admin".to_string(),
        tags: vec![],
        checks: vec![],
    });

    let result = client.register_task("a1", &task, None).await;
    assert!(matches!(result, Err(SyncError::Translate(_))));
    assert_eq!(registry.service_count(), 0);
}

#[tokio::test]
async fn test_reconcile_retries_until_registry_recovers() {
    let registry = Arc::new(MockRegistry::default());
    registry.set_failing(true);

    let client = new_client(&registry);
    let task = web_task("v1", vec![]);
    client.register_task("a1", &task, None).await.unwrap();

    // While the registry errors, nothing lands.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(registry.service_count(), 0);

    // After recovery the retry timer converges the state.
    registry.set_failing(false);
    eventually("recovery after registry errors", || {
        registry.has_service("_regsync-executor-a1-web-web-v1")
    })
    .await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let registry = Arc::new(MockRegistry::default());
    let client = new_client(&registry);

    client.shutdown().await.unwrap();
    client.shutdown().await.unwrap();
}
