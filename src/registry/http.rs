//! HTTP implementation of the registry agent interface.
//!
//! Speaks the registry agent's local HTTP API via `reqwest`. Uses a reusable
//! client with connection pooling and a request timeout. Wire DTOs live here
//! and are converted to the core types at the boundary.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::r#trait::{RegistryAgent, RegistryError};
use super::types::{
    CheckRegistration, CheckTarget, HealthStatus, RemoteCheck, RemoteService, ServiceRegistration,
};

/// Default timeout for registry agent requests.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the HTTP registry agent client.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL of the registry agent, e.g. `http://127.0.0.1:8500`.
    pub base_url: String,

    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpConfig {
    /// Creates a configuration for the given registry agent address.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    /// Sets a custom request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Registry agent client using direct HTTP requests.
pub struct HttpRegistryAgent {
    /// Reusable HTTP client with connection pooling.
    http: reqwest::Client,

    /// Base URL without a trailing slash.
    base_url: String,
}

impl HttpRegistryAgent {
    /// Creates a new client for the configured registry agent.
    pub fn new(config: HttpConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, RegistryError> {
        let response = self
            .http
            .get(self.endpoint(path))
            .send()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| RegistryError::Decode(e.to_string()))
    }

    async fn put_json<T: Serialize>(&self, path: &str, body: &T) -> Result<(), RegistryError> {
        let response = self
            .http
            .put(self.endpoint(path))
            .json(body)
            .send()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }

    async fn put_empty(&self, path: &str) -> Result<(), RegistryError> {
        let response = self
            .http
            .put(self.endpoint(path))
            .send()
            .await
            .map_err(|e| RegistryError::Http(e.to_string()))?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RegistryError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RegistryAgent for HttpRegistryAgent {
    async fn list_services(&self) -> Result<HashMap<String, RemoteService>, RegistryError> {
        let services: HashMap<String, ServiceDto> = self.get_json("/v1/agent/services").await?;
        Ok(services
            .into_iter()
            .map(|(id, dto)| (id, dto.into()))
            .collect())
    }

    async fn list_checks(&self) -> Result<HashMap<String, RemoteCheck>, RegistryError> {
        let checks: HashMap<String, CheckDto> = self.get_json("/v1/agent/checks").await?;
        Ok(checks
            .into_iter()
            .map(|(id, dto)| (id, dto.into()))
            .collect())
    }

    async fn register_service(&self, service: &ServiceRegistration) -> Result<(), RegistryError> {
        self.put_json("/v1/agent/service/register", &ServiceRegDto::from(service))
            .await
    }

    async fn deregister_service(&self, service_id: &str) -> Result<(), RegistryError> {
        self.put_empty(&format!("/v1/agent/service/deregister/{}", service_id))
            .await
    }

    async fn register_check(&self, check: &CheckRegistration) -> Result<(), RegistryError> {
        self.put_json("/v1/agent/check/register", &CheckRegDto::from(check))
            .await
    }

    async fn deregister_check(&self, check_id: &str) -> Result<(), RegistryError> {
        self.put_empty(&format!("/v1/agent/check/deregister/{}", check_id))
            .await
    }

    async fn update_ttl(
        &self,
        check_id: &str,
        output: &str,
        status: HealthStatus,
    ) -> Result<(), RegistryError> {
        self.put_json(
            &format!("/v1/agent/check/update/{}", check_id),
            &TtlUpdateDto {
                status: status.as_str(),
                output,
            },
        )
        .await
    }
}

// =============================================================================
// Wire DTOs
// =============================================================================

#[derive(Serialize)]
struct ServiceRegDto<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "Tags")]
    tags: &'a [String],
    #[serde(rename = "Address")]
    address: &'a str,
    #[serde(rename = "Port")]
    port: u16,
}

impl<'a> From<&'a ServiceRegistration> for ServiceRegDto<'a> {
    fn from(service: &'a ServiceRegistration) -> Self {
        Self {
            id: &service.id,
            name: &service.name,
            tags: &service.tags,
            address: &service.address,
            port: service.port,
        }
    }
}

#[derive(Serialize)]
struct CheckRegDto<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    #[serde(rename = "Name")]
    name: &'a str,
    #[serde(rename = "ServiceID")]
    service_id: &'a str,
    #[serde(rename = "Status")]
    status: &'a str,
    #[serde(rename = "Interval")]
    interval: String,
    #[serde(rename = "Timeout")]
    timeout: String,
    #[serde(rename = "HTTP", skip_serializing_if = "Option::is_none")]
    http: Option<&'a str>,
    #[serde(rename = "TCP", skip_serializing_if = "Option::is_none")]
    tcp: Option<&'a str>,
    #[serde(rename = "TTL", skip_serializing_if = "Option::is_none")]
    ttl: Option<String>,
}

impl<'a> From<&'a CheckRegistration> for CheckRegDto<'a> {
    fn from(check: &'a CheckRegistration) -> Self {
        let (http, tcp, ttl) = match &check.target {
            CheckTarget::Http(url) => (Some(url.as_str()), None, None),
            CheckTarget::Tcp(endpoint) => (None, Some(endpoint.as_str()), None),
            CheckTarget::Ttl(ttl) => (None, None, Some(duration_to_api(*ttl))),
        };
        Self {
            id: &check.id,
            name: &check.name,
            service_id: &check.service_id,
            status: check.status.as_str(),
            interval: duration_to_api(check.interval),
            timeout: duration_to_api(check.timeout),
            http,
            tcp,
            ttl,
        }
    }
}

#[derive(Deserialize)]
struct ServiceDto {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    name: String,
    #[serde(rename = "Tags", default)]
    tags: Option<Vec<String>>,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port", default)]
    port: u16,
}

impl From<ServiceDto> for RemoteService {
    fn from(dto: ServiceDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            tags: dto.tags.unwrap_or_default(),
            address: dto.address,
            port: dto.port,
        }
    }
}

#[derive(Deserialize)]
struct CheckDto {
    #[serde(rename = "CheckID")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "ServiceID", default)]
    service_id: String,
    #[serde(rename = "Status", default)]
    status: String,
}

impl From<CheckDto> for RemoteCheck {
    fn from(dto: CheckDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            service_id: dto.service_id,
            status: dto.status,
        }
    }
}

#[derive(Serialize)]
struct TtlUpdateDto<'a> {
    #[serde(rename = "Status")]
    status: &'a str,
    #[serde(rename = "Output")]
    output: &'a str,
}

/// Formats a duration the way the registry API expects (`"10s"`, `"250ms"`).
fn duration_to_api(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
