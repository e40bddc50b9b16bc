//! Core registry data model.
//!
//! These are our own types, decoupled from any wire format. The HTTP client
//! keeps its serde DTOs private and converts at the boundary.

use std::fmt;
use std::time::Duration;

/// Health of a check as understood by the remote registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HealthStatus {
    /// The check is healthy.
    #[default]
    Passing,
    /// The check is degraded but not failing.
    Warning,
    /// The check is failing.
    Critical,
}

impl HealthStatus {
    /// Returns the registry's wire representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A service registration to install in the remote registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRegistration {
    /// Registry-unique identifier. Encodes ownership (see `sync::ids`).
    pub id: String,
    /// Logical service name.
    pub name: String,
    /// Tags attached to the service.
    pub tags: Vec<String>,
    /// Network address the service is reachable at.
    pub address: String,
    /// Port the service listens on.
    pub port: u16,
}

/// How the remote registry probes a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckTarget {
    /// The registry polls this URL.
    Http(String),
    /// The registry connects to this `host:port` endpoint.
    Tcp(String),
    /// The owner heartbeats within this window; the registry only expires it.
    Ttl(Duration),
}

/// A check registration to install in the remote registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRegistration {
    /// Registry-unique check identifier.
    pub id: String,
    /// Human-readable check name.
    pub name: String,
    /// Identifier of the service this check belongs to.
    pub service_id: String,
    /// Status the check starts in.
    pub status: HealthStatus,
    /// How often the registry (or the owner, for TTL checks) evaluates it.
    pub interval: Duration,
    /// Per-probe timeout.
    pub timeout: Duration,
    /// What the registry does to evaluate the check.
    pub target: CheckTarget,
}

/// A service as reported back by the remote registry's snapshot API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteService {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    pub address: String,
    pub port: u16,
}

/// A check as reported back by the remote registry's snapshot API.
///
/// The status is kept as the registry's raw string; reconciliation only
/// consults the ID set and the owning service ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCheck {
    pub id: String,
    pub name: String,
    pub service_id: String,
    pub status: String,
}
