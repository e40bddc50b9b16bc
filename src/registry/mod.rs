//! Remote service registry interface.
//!
//! The reconciler consumes the registry through the narrow [`RegistryAgent`]
//! trait; [`HttpRegistryAgent`] is the production implementation speaking the
//! registry agent's local HTTP API.

mod http;
mod r#trait;
mod types;

pub use http::{HttpConfig, HttpRegistryAgent, DEFAULT_HTTP_TIMEOUT};
pub use r#trait::{RegistryAgent, RegistryError};
pub use types::{
    CheckRegistration, CheckTarget, HealthStatus, RemoteCheck, RemoteService, ServiceRegistration,
};
