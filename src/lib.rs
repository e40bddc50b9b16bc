//! RegSync - service registry reconciliation for orchestrated workloads
//!
//! This library keeps a remote service registry (catalog + health-check agent
//! exposed over HTTP) in sync with the services and health checks declared by
//! the workloads running on a node. Callers declare what should exist; the
//! reconciler owns making the registry match and drives script-based health
//! checks whose results the registry cannot compute on its own.
//!
//! # High-Level API
//!
//! ```ignore
//! use std::sync::Arc;
//! use regsync::registry::{HttpConfig, HttpRegistryAgent};
//! use regsync::sync::{SyncClient, SyncConfig};
//!
//! let registry = Arc::new(HttpRegistryAgent::new(HttpConfig::new("http://127.0.0.1:8500")));
//! let client = SyncClient::new(registry, SyncConfig::default());
//!
//! // Declare a task's services; the loop converges the registry in the background
//! client.register_task(alloc_id, &task, Some(executor)).await?;
//!
//! // When shutting down
//! client.shutdown().await?;
//! ```

pub mod exec;
pub mod logging;
pub mod registry;
pub mod sync;
pub mod workload;

/// Version of the RegSync library.
///
/// The version is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
