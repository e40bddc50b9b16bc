//! Declared workload model consumed by the reconciler.
//!
//! Tasks declare the services they expose and the health checks attached to
//! each service. The reconciler never inspects a task beyond this surface:
//! it derives registry IDs from the declaration and resolves port labels via
//! [`Task::find_host_and_port_for`].

mod service;
mod task;

pub use service::{CheckKind, Service, ServiceCheck};
pub use task::Task;
