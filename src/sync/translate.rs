//! Translation from declared checks to registry-ready check records.

use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

use crate::registry::{CheckRegistration, CheckTarget};
use crate::workload::{CheckKind, ServiceCheck};

/// Slack added on top of a script check's interval when sizing its TTL.
///
/// The buffer absorbs scheduling jitter so a healthy script whose interval
/// is honoured cannot expire the TTL between heartbeats.
pub const TTL_CHECK_BUFFER: Duration = Duration::from_secs(31);

/// Errors translating a declaration into registry registrations.
///
/// These surface synchronously to the caller; the batch is abandoned.
#[derive(Debug, Error)]
pub enum TranslateError {
    /// A service or check referenced a port label the task does not bind.
    #[error("unknown port label {label:?} for {name:?}")]
    UnknownPortLabel { label: String, name: String },

    /// An agent port label did not parse as a literal `host:port`.
    #[error("invalid host:port {value:?} for {name:?}: {reason}")]
    InvalidHostPort {
        name: String,
        value: String,
        reason: String,
    },

    /// An HTTP check path did not resolve against the service address.
    #[error("invalid HTTP check path {path:?}: {reason}")]
    InvalidHttpPath { path: String, reason: String },

    /// Agent services cannot carry script checks.
    #[error("service {service:?} contains invalid check: agent checks do not support scripts")]
    AgentScriptCheck { service: String },

    /// A script check was declared but no executor was supplied.
    #[error("task driver does not support script checks")]
    ScriptUnsupported,
}

/// Creates a check record ready to register with the remote registry.
///
/// Script checks get a TTL sized `interval + TTL_CHECK_BUFFER`; the caller
/// is responsible for running the script and heartbeating.
pub fn create_check_reg(
    service_id: &str,
    check_id: String,
    check: &ServiceCheck,
    host: &str,
    port: u16,
) -> Result<CheckRegistration, TranslateError> {
    let target = match &check.kind {
        CheckKind::Http { path, protocol } => {
            let scheme = protocol.as_deref().unwrap_or("http");
            let base = format!("{}://{}/", scheme, join_host_port(host, port));
            let base = Url::parse(&base).map_err(|e| TranslateError::InvalidHttpPath {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            let url = base.join(path).map_err(|e| TranslateError::InvalidHttpPath {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            CheckTarget::Http(url.to_string())
        }
        CheckKind::Tcp => CheckTarget::Tcp(join_host_port(host, port)),
        CheckKind::Script { .. } => CheckTarget::Ttl(check.interval + TTL_CHECK_BUFFER),
    };

    Ok(CheckRegistration {
        id: check_id,
        name: check.name.clone(),
        service_id: service_id.to_string(),
        status: check.initial_status,
        interval: check.interval,
        timeout: check.timeout,
        target,
    })
}

/// Joins a host and port, bracketing IPv6 addresses.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Splits a literal `host:port` (or `[v6addr]:port`) into its parts.
pub fn split_host_port(value: &str) -> Result<(String, u16), String> {
    let (host, port) = if let Some(rest) = value.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| "missing closing bracket".to_string())?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| "missing port".to_string())?;
        (host, port)
    } else {
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| "missing port".to_string())?;
        if host.contains(':') {
            return Err("too many colons; bracket IPv6 addresses".to_string());
        }
        (host, port)
    };

    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port {:?}", port))?;
    Ok((host.to_string(), port))
}
