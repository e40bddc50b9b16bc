//! Service-registration reconciliation.
//!
//! This module keeps the remote registry in sync with the services and
//! checks declared locally. Callers build declarative mutation batches via
//! [`SyncClient`]; a single loop task owns the desired state and converges
//! the registry against it. Script checks get independent worker tasks that
//! heartbeat TTL checks the registry cannot evaluate on its own.
//!
//! Correctness across restarts and nodes follows from the identifier
//! scheme alone: every entry this reconciler manages carries the
//! [`OWNED_ID_PREFIX`], and entries without it are never touched.

mod client;
mod ids;
mod ops;
mod script;
mod translate;

pub use client::{
    SyncClient, SyncConfig, SyncError, DEFAULT_MAX_RETRY_INTERVAL, DEFAULT_OP_CHANNEL_CAPACITY,
    DEFAULT_RETRY_INTERVAL, DEFAULT_SHUTDOWN_WAIT,
};
pub use ids::{
    is_owned_id, make_agent_service_id, make_task_service_id, AgentRole, OWNED_ID_PREFIX,
    SERVICE_TAG_HTTP, SERVICE_TAG_RPC, SERVICE_TAG_SERF,
};
pub use translate::{create_check_reg, TranslateError, TTL_CHECK_BUFFER};
