use serde::{Deserialize, Serialize};
use std::fmt;

/// The remote operations a provisioning run submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    AttachMedia,
    AttachNetwork,
    AttachStorage,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "create"),
            Operation::AttachMedia => write!(f, "attach-media"),
            Operation::AttachNetwork => write!(f, "attach-network"),
            Operation::AttachStorage => write!(f, "attach-storage"),
        }
    }
}

/// Opaque platform task reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(pub String);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Success,
    Error,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error)
    }
}

/// Snapshot of a task as observed on one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Identifier of the object a create task produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl TaskInfo {
    pub fn queued() -> Self {
        Self { state: TaskState::Queued, error: None, result: None }
    }

    pub fn running() -> Self {
        Self { state: TaskState::Running, error: None, result: None }
    }

    pub fn success(result: Option<String>) -> Self {
        Self { state: TaskState::Success, error: None, result }
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self { state: TaskState::Error, error: Some(detail.into()), result: None }
    }
}
