use serde::{Deserialize, Serialize};
use std::fmt;

// One entry of the batch document, already validated.
// Nothing mutates these after the loader hands them out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineSpec {
    pub name: String,          // doubles as the idempotency key
    pub cpu_count: u32,
    pub memory_mb: u64,
    pub guest_os: String,      // platform guest identifier, e.g. "otherGuest"
    pub nic_kind: NicKind,
    pub network: String,
    pub controllers: Vec<ControllerSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerSpec {
    pub kind: ControllerKind,
    pub disks: Vec<DiskSpec>,
}

pub const KB_PER_GB: u64 = 1024 * 1024;

/// A disk's unit number is its index in `ControllerSpec::disks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    pub capacity_gb: u64,
}

impl DiskSpec {
    /// Loader-validated specs never overflow here.
    pub fn capacity_kb(&self) -> u64 {
        self.capacity_gb.saturating_mul(KB_PER_GB)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerKind {
    LsiLogicParallel,
    Paravirtual,
}

impl ControllerKind {
    /// Accepts the spellings batch documents use ("lsi logic parallel", "paravirtual").
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "lsi logic parallel" | "lsilogic" | "lsi logic" => Some(ControllerKind::LsiLogicParallel),
            "paravirtual" | "pvscsi" => Some(ControllerKind::Paravirtual),
            _ => None,
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerKind::LsiLogicParallel => write!(f, "lsi logic parallel"),
            ControllerKind::Paravirtual => write!(f, "paravirtual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NicKind {
    Vmxnet3,
    E1000,
}

impl NicKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "VMXNET3" => Some(NicKind::Vmxnet3),
            "E1000" => Some(NicKind::E1000),
            _ => None,
        }
    }
}

impl fmt::Display for NicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NicKind::Vmxnet3 => write!(f, "VMXNET3"),
            NicKind::E1000 => write!(f, "E1000"),
        }
    }
}

/// Body of a create-machine submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    pub name: String,
    pub num_cpus: u32,
    pub memory_mb: u64,
    pub guest_id: String,
    pub version: String,
    pub vm_path_name: String,  // "[volume]" - the platform picks the folder
}

impl MachineConfig {
    pub fn for_spec(spec: &MachineSpec, volume: &str, hardware_version: &str) -> Self {
        Self {
            name: spec.name.clone(),
            num_cpus: spec.cpu_count,
            memory_mb: spec.memory_mb,
            guest_id: spec.guest_os.clone(),
            version: hardware_version.to_string(),
            vm_path_name: volume_path(volume),
        }
    }
}

pub fn volume_path(volume: &str) -> String {
    format!("[{}]", volume)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_controller_kinds_loosely() {
        assert_eq!(ControllerKind::parse("lsi logic parallel"), Some(ControllerKind::LsiLogicParallel));
        assert_eq!(ControllerKind::parse("LSI-Logic-Parallel"), Some(ControllerKind::LsiLogicParallel));
        assert_eq!(ControllerKind::parse(" paravirtual "), Some(ControllerKind::Paravirtual));
        assert_eq!(ControllerKind::parse("buslogic"), None);
    }

    #[test]
    fn parses_nic_kinds() {
        assert_eq!(NicKind::parse("VMXNET3"), Some(NicKind::Vmxnet3));
        assert_eq!(NicKind::parse("e1000"), Some(NicKind::E1000));
        assert_eq!(NicKind::parse("e1000e"), None);
    }

    #[test]
    fn disk_capacity_is_reported_in_kb() {
        assert_eq!(DiskSpec { capacity_gb: 40 }.capacity_kb(), 40 * 1024 * 1024);
    }
}
