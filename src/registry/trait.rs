//! The registry agent interface consumed by the reconciler.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{CheckRegistration, HealthStatus, RemoteCheck, RemoteService, ServiceRegistration};

/// Errors from talking to the remote registry.
///
/// All of these are transient from the reconciler's point of view: the sync
/// loop retries with backoff and script runners retry on the next interval.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The HTTP request could not be completed (connect, timeout, ...).
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// The registry answered with a non-success status.
    #[error("registry returned status {status}: {body}")]
    Api { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("failed to decode registry response: {0}")]
    Decode(String),
}

/// The subset of the remote registry's agent API used for reconciliation.
///
/// Implementations must be safe for concurrent use: the sync loop and every
/// script runner call them independently.
#[async_trait]
pub trait RegistryAgent: Send + Sync {
    /// Snapshot of all services known to the registry agent, keyed by ID.
    async fn list_services(&self) -> Result<HashMap<String, RemoteService>, RegistryError>;

    /// Snapshot of all checks known to the registry agent, keyed by ID.
    async fn list_checks(&self) -> Result<HashMap<String, RemoteCheck>, RegistryError>;

    /// Install a service registration.
    async fn register_service(&self, service: &ServiceRegistration) -> Result<(), RegistryError>;

    /// Remove a service by ID.
    async fn deregister_service(&self, service_id: &str) -> Result<(), RegistryError>;

    /// Install a check registration.
    async fn register_check(&self, check: &CheckRegistration) -> Result<(), RegistryError>;

    /// Remove a check by ID.
    async fn deregister_check(&self, check_id: &str) -> Result<(), RegistryError>;

    /// Heartbeat a TTL check with its latest result.
    async fn update_ttl(
        &self,
        check_id: &str,
        output: &str,
        status: HealthStatus,
    ) -> Result<(), RegistryError>;
}
