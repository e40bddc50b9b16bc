//! Identifier scheme for registry entries owned by this reconciler.
//!
//! IDs are pure functions of their inputs, which makes reconciliation
//! idempotent: any semantically meaningful change to a declaration changes
//! the ID and manifests as a deregister+register pair. Ownership is carried
//! in the ID itself rather than in a side table, so a freshly started
//! reconciler can sweep stale entries without persisted state.

use std::fmt;

use crate::workload::Service;

/// Prefix scoping every registry entry this reconciler manages.
///
/// Entries without this prefix belong to some other party and are never
/// touched.
pub const OWNED_ID_PREFIX: &str = "_regsync";

/// Tag assigned to HTTP agent services.
pub const SERVICE_TAG_HTTP: &str = "http";

/// Tag assigned to RPC agent services.
pub const SERVICE_TAG_RPC: &str = "rpc";

/// Tag assigned to gossip agent services.
pub const SERVICE_TAG_SERF: &str = "serf";

/// Role an agent registers itself under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Server,
    Client,
}

impl AgentRole {
    /// Returns the role segment used in agent service IDs.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Server => "server",
            AgentRole::Client => "client",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Creates the registry ID for a service the agent registers on its own
/// behalf.
///
/// Agent service IDs are of the form:
///
/// ```text
/// {OWNED_ID_PREFIX}-{role}-{service.name}[-{tag}]*
/// Example server ID: _regsync-server-api-serf
/// Example client ID: _regsync-client-api-http
/// ```
pub fn make_agent_service_id(role: AgentRole, service: &Service) -> String {
    let mut parts = Vec::with_capacity(service.tags.len() + 3);
    parts.push(OWNED_ID_PREFIX);
    parts.push(role.as_str());
    parts.push(service.name.as_str());
    for tag in &service.tags {
        parts.push(tag.as_str());
    }
    parts.join("-")
}

/// Creates the registry ID for a service declared by a workload task.
///
/// Task service IDs are of the form:
///
/// ```text
/// {OWNED_ID_PREFIX}-executor-{alloc_id}-{task_name}-{service.name}[-{tag}]*
/// Example: _regsync-executor-1234-web-web-tag1-tag2
/// ```
pub fn make_task_service_id(alloc_id: &str, task_name: &str, service: &Service) -> String {
    let mut parts = Vec::with_capacity(service.tags.len() + 5);
    parts.push(OWNED_ID_PREFIX);
    parts.push("executor");
    parts.push(alloc_id);
    parts.push(task_name);
    parts.push(service.name.as_str());
    for tag in &service.tags {
        parts.push(tag.as_str());
    }
    parts.join("-")
}

/// Returns true if the ID belongs to this reconciler.
pub fn is_owned_id(id: &str) -> bool {
    id.starts_with(OWNED_ID_PREFIX)
}
