//! Mutation batches submitted to the sync loop.

use crate::registry::{CheckRegistration, ServiceRegistration};

use super::script::ScriptCheck;

/// A batch of declarative mutations applied atomically to the desired-state
/// store by the sync loop.
///
/// Within a batch, registrations are merged before deregistrations.
#[derive(Default)]
pub(crate) struct Ops {
    /// Service registrations to upsert.
    pub(crate) reg_services: Vec<ServiceRegistration>,

    /// Check registrations to upsert.
    pub(crate) reg_checks: Vec<CheckRegistration>,

    /// Script check definitions to upsert.
    pub(crate) scripts: Vec<ScriptCheck>,

    /// Service IDs to remove.
    pub(crate) dereg_services: Vec<String>,

    /// Check IDs to remove.
    pub(crate) dereg_checks: Vec<String>,
}
