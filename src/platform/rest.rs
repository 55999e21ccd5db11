//! HTTP/JSON client for the host's management endpoint.
//!
//! Endpoints used:
//! - `POST   /api/session` (basic auth) -> session token string
//! - `DELETE /api/session`
//! - `GET    /api/inventory/{machines|networks|volumes}`
//! - `GET    /api/machines/{id}/devices`
//! - `POST   /api/machines` -> `{ "task": "..." }`
//! - `POST   /api/machines/{id}/reconfigure` -> `{ "task": "..." }`
//! - `GET    /api/tasks/{id}`
//!
//! Every authenticated call carries the token in `X-Session-Token`.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{Credentials, HostConnector, ManagementApi};
use crate::config::HostSettings;
use crate::core::{
    ConfigChange, DeviceInfo, InventoryObject, MachineConfig, ObjectId, ObjectKind, TaskHandle,
    TaskInfo,
};
use crate::errors::{ProvisionError, ProvisionResult, RetryPolicy};

const SESSION_HEADER: &str = "X-Session-Token";

#[derive(Debug, Deserialize)]
struct TaskReference {
    task: TaskHandle,
}

pub struct RestPlatform {
    base_url: String,
    http_client: Client,
    session_token: Arc<RwLock<Option<String>>>,
    retry: RetryPolicy,
}

impl RestPlatform {
    pub fn new(address: &str, settings: &HostSettings) -> ProvisionResult<Self> {
        if !settings.verify_tls {
            warn!("TLS certificate verification is disabled for {}", address);
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()
            .map_err(|e| ProvisionError::Connection(e.to_string()))?;

        Ok(Self {
            base_url: base_url(address, settings.port),
            http_client,
            session_token: Arc::new(RwLock::new(None)),
            retry: RetryPolicy::new(
                settings.max_retries,
                Duration::from_millis(settings.retry_delay_ms),
            ),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn login(&self, credentials: &Credentials) -> ProvisionResult<()> {
        info!("Connecting to {} as {}", self.base_url, credentials.username);

        let response = self
            .http_client
            .post(format!("{}/api/session", self.base_url))
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await
            .map_err(|e| ProvisionError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisionError::Connection(format!(
                "login rejected ({}): {}",
                status, body
            )));
        }

        let token: String = response
            .json()
            .await
            .map_err(|e| ProvisionError::Connection(format!("unreadable session token: {}", e)))?;

        *self.session_token.write().await = Some(token);
        info!("Session established");
        Ok(())
    }

    pub async fn logout(&self) -> ProvisionResult<()> {
        let token = self.session_token.write().await.take();
        let Some(token) = token else {
            return Ok(());
        };

        info!("Disconnecting from {}", self.base_url);
        let response = self
            .http_client
            .delete(format!("{}/api/session", self.base_url))
            .header(SESSION_HEADER, token)
            .send()
            .await?;

        if !response.status().is_success() {
            warn!("Session logout returned {}", response.status());
        }
        Ok(())
    }

    async fn request<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&T>,
    ) -> ProvisionResult<R> {
        let url = format!("{}{}", self.base_url, path);
        debug!("API request: {} {}", method, url);

        let token = self
            .session_token
            .read()
            .await
            .clone()
            .ok_or_else(|| ProvisionError::Connection("not connected".to_string()))?;

        let mut request = self
            .http_client
            .request(method.clone(), &url)
            .header(SESSION_HEADER, token);

        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            warn!("API request failed: {} {} - {} {}", method, path, status, error_text);
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ProvisionError::Connection(format!("session rejected: {}", error_text))
                }
                _ => ProvisionError::Platform(format!("{} {} returned {}: {}", method, path, status, error_text)),
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ProvisionError::Platform(format!("unexpected response from {}: {}", path, e)))
    }
}

#[async_trait]
impl ManagementApi for RestPlatform {
    async fn list_objects(&self, kind: ObjectKind) -> ProvisionResult<Vec<InventoryObject>> {
        let path = format!("/api/inventory/{}", inventory_segment(kind));
        self.retry
            .run("list objects", || self.request::<(), _>(Method::GET, &path, None))
            .await
    }

    async fn machine_devices(&self, machine: &ObjectId) -> ProvisionResult<Vec<DeviceInfo>> {
        let path = format!("/api/machines/{}/devices", machine);
        self.retry
            .run("machine devices", || self.request::<(), _>(Method::GET, &path, None))
            .await
    }

    async fn submit_create(&self, config: &MachineConfig) -> ProvisionResult<TaskHandle> {
        let reference: TaskReference = self
            .request(Method::POST, "/api/machines", Some(config))
            .await?;
        Ok(reference.task)
    }

    async fn submit_reconfigure(
        &self,
        machine: &ObjectId,
        change: &ConfigChange,
    ) -> ProvisionResult<TaskHandle> {
        let path = format!("/api/machines/{}/reconfigure", machine);
        let reference: TaskReference = self.request(Method::POST, &path, Some(change)).await?;
        Ok(reference.task)
    }

    async fn task_info(&self, task: &TaskHandle) -> ProvisionResult<TaskInfo> {
        let path = format!("/api/tasks/{}", task);
        self.retry
            .run("task state", || self.request::<(), _>(Method::GET, &path, None))
            .await
    }
}

/// Builds `RestPlatform` sessions from host settings.
pub struct RestConnector {
    settings: HostSettings,
}

impl RestConnector {
    pub fn new(settings: HostSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl HostConnector for RestConnector {
    type Session = RestPlatform;

    async fn connect(&self, address: &str, credentials: &Credentials) -> ProvisionResult<RestPlatform> {
        let platform = RestPlatform::new(address, &self.settings)?;
        platform.login(credentials).await?;
        Ok(platform)
    }

    async fn disconnect(&self, session: &RestPlatform) -> ProvisionResult<()> {
        session.logout().await
    }
}

fn base_url(address: &str, port: u16) -> String {
    let address = address.trim().trim_end_matches('/');
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("https://{}:{}", address, port)
    }
}

fn inventory_segment(kind: ObjectKind) -> &'static str {
    match kind {
        ObjectKind::Machine => "machines",
        ObjectKind::Network => "networks",
        ObjectKind::Volume => "volumes",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_scheme_and_port() {
        assert_eq!(base_url("192.168.1.56", 443), "https://192.168.1.56:443");
        assert_eq!(base_url("esx01.lab/", 8443), "https://esx01.lab:8443");
    }

    #[test]
    fn explicit_url_is_kept() {
        assert_eq!(base_url("http://localhost:8080/", 443), "http://localhost:8080");
    }

    #[test]
    fn client_creation() {
        let platform = RestPlatform::new("192.168.1.56", &HostSettings::default());
        assert!(platform.is_ok());
    }

    #[tokio::test]
    async fn requests_need_a_session() {
        let platform = RestPlatform::new("http://127.0.0.1:9", &HostSettings::default()).unwrap();
        let err = platform.list_objects(ObjectKind::Machine).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Connection(_)));
    }
}
