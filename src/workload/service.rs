//! Declared services and their health checks.

use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::registry::HealthStatus;

/// A service declared by a task or by the agent itself.
///
/// For agent services the port label holds a literal `host:port` instead of
/// a label to resolve (agents have no port map).
#[derive(Debug, Clone, Default)]
pub struct Service {
    /// Logical service name.
    pub name: String,

    /// Port label to resolve against the task, or a literal `host:port`
    /// for agent services.
    pub port_label: String,

    /// Tags attached to the service. Tags participate in the service ID, so
    /// editing them renames the service in the registry.
    pub tags: Vec<String>,

    /// Health checks attached to the service.
    pub checks: Vec<ServiceCheck>,
}

/// How a declared check probes the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckKind {
    /// The registry polls an HTTP endpoint.
    Http {
        /// Path resolved against the service address as a relative reference.
        path: String,
        /// URL scheme; `http` when unset.
        protocol: Option<String>,
    },
    /// The registry opens a TCP connection to the service endpoint.
    Tcp,
    /// The reconciler runs a command and heartbeats the result.
    Script { command: String, args: Vec<String> },
}

/// A health check declared on a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCheck {
    /// Human-readable check name.
    pub name: String,

    /// Probe shape.
    pub kind: CheckKind,

    /// Optional port label overriding the owning service's binding.
    pub port_label: Option<String>,

    /// Probe interval.
    pub interval: Duration,

    /// Per-probe timeout.
    pub timeout: Duration,

    /// Status the check starts in before the first probe.
    pub initial_status: HealthStatus,
}

impl ServiceCheck {
    /// Derives the stable registry ID for this check on the given service.
    ///
    /// The ID is a function of the owning service ID and every declared
    /// field, so any semantic edit produces a new ID and manifests as a
    /// deregister+register pair during reconciliation.
    pub fn check_id(&self, service_id: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(service_id.as_bytes());
        hasher.update(self.name.as_bytes());
        match &self.kind {
            CheckKind::Http { path, protocol } => {
                hasher.update(b"http");
                hasher.update(path.as_bytes());
                if let Some(protocol) = protocol {
                    hasher.update(protocol.as_bytes());
                }
            }
            CheckKind::Tcp => {
                hasher.update(b"tcp");
            }
            CheckKind::Script { command, args } => {
                hasher.update(b"script");
                hasher.update(command.as_bytes());
                for arg in args {
                    hasher.update(arg.as_bytes());
                }
            }
        }
        if let Some(label) = &self.port_label {
            hasher.update(label.as_bytes());
        }
        hasher.update(self.interval.as_nanos().to_be_bytes());
        hasher.update(self.timeout.as_nanos().to_be_bytes());
        hasher.update(self.initial_status.as_str().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
