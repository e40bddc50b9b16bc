//! Workload tasks and their network bindings.

use std::collections::HashMap;

use super::service::Service;

/// A workload task declaring zero or more services.
#[derive(Debug, Clone, Default)]
pub struct Task {
    /// Task name; participates in task service IDs.
    pub name: String,

    /// Services this task exposes.
    pub services: Vec<Service>,

    /// Resolved network bindings, keyed by port label.
    ports: HashMap<String, (String, u16)>,
}

impl Task {
    /// Creates a task with no services or port bindings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            services: Vec::new(),
            ports: HashMap::new(),
        }
    }

    /// Adds a declared service.
    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    /// Binds a port label to a host address and port.
    pub fn with_port(
        mut self,
        label: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        self.ports.insert(label.into(), (host.into(), port));
        self
    }

    /// Resolves a port label to the host and port it is bound to.
    pub fn find_host_and_port_for(&self, port_label: &str) -> Option<(String, u16)> {
        self.ports.get(port_label).cloned()
    }
}
