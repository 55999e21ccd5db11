use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of inventory objects the host exposes by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Machine,
    Network,
    Volume,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Machine => write!(f, "Machine"),
            ObjectKind::Network => write!(f, "Network"),
            ObjectKind::Volume => write!(f, "Volume"),
        }
    }
}

/// Platform-assigned identifier (a managed object id, a uuid, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub String);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(id: &str) -> Self {
        ObjectId(id.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryObject {
    pub id: ObjectId,
    pub name: String,
    pub kind: ObjectKind,
    /// Only volumes report this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free_space_bytes: Option<u64>,
}

impl InventoryObject {
    pub fn new(kind: ObjectKind, id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ObjectId(id.into()),
            name: name.into(),
            kind,
            free_space_bytes: None,
        }
    }

    pub fn volume(id: impl Into<String>, name: impl Into<String>, free_space_bytes: u64) -> Self {
        Self {
            free_space_bytes: Some(free_space_bytes),
            ..Self::new(ObjectKind::Volume, id, name)
        }
    }
}
