//! The remote side of provisioning: what the orchestrator can ask the host
//! and how a session with it is opened and closed.

pub mod rest;
pub mod simulated;

use async_trait::async_trait;
use std::fmt;

use crate::core::{
    ConfigChange, DeviceInfo, InventoryObject, MachineConfig, ObjectId, ObjectKind, TaskHandle,
    TaskInfo,
};
use crate::errors::ProvisionResult;

pub use rest::{RestConnector, RestPlatform};
pub use simulated::{SimulatedPlatform, Submission, TaskScript};

/// Query and submission surface of a virtualization host.
///
/// Submissions only queue work and hand back a task; completion is observed
/// through `task_info`.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// Every object of `kind` under the host's root scope, in platform order.
    async fn list_objects(&self, kind: ObjectKind) -> ProvisionResult<Vec<InventoryObject>>;

    async fn machine_devices(&self, machine: &ObjectId) -> ProvisionResult<Vec<DeviceInfo>>;

    async fn submit_create(&self, config: &MachineConfig) -> ProvisionResult<TaskHandle>;

    async fn submit_reconfigure(
        &self,
        machine: &ObjectId,
        change: &ConfigChange,
    ) -> ProvisionResult<TaskHandle>;

    async fn task_info(&self, task: &TaskHandle) -> ProvisionResult<TaskInfo>;
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

// keep passwords out of the logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Opens and closes authenticated sessions. The orchestrator never sees
/// credentials, only the session it gets back.
#[async_trait]
pub trait HostConnector: Send + Sync {
    type Session: ManagementApi + 'static;

    async fn connect(&self, address: &str, credentials: &Credentials) -> ProvisionResult<Self::Session>;

    async fn disconnect(&self, session: &Self::Session) -> ProvisionResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("root", "hunter2");
        let shown = format!("{:?}", creds);
        assert!(shown.contains("root"));
        assert!(!shown.contains("hunter2"));
    }
}
