//! Device descriptors submitted in reconfigure operations, plus the
//! read-only view of devices already present on a machine.

use serde::{Deserialize, Serialize};

use super::vm::{ControllerKind, NicKind};

/// Key of the machine's PCI bus controller; new SCSI controllers hang off it.
pub const PCI_CONTROLLER_KEY: i32 = 100;

/// SCSI initiator id reserved for the controller itself.
pub const SCSI_CONTROLLER_INITIATOR_UNIT: u32 = 7;

/// An IDE controller takes at most this many devices.
pub const IDE_CONTROLLER_CAPACITY: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub device_changes: Vec<DeviceChange>,
}

impl ConfigChange {
    pub fn new(device_changes: Vec<DeviceChange>) -> Self {
        Self { device_changes }
    }

    pub fn controllers(&self) -> impl Iterator<Item = &ScsiController> {
        self.device_changes.iter().filter_map(|c| match &c.device {
            VirtualDevice::ScsiController(ctrl) => Some(ctrl),
            _ => None,
        })
    }

    pub fn disks(&self) -> impl Iterator<Item = &Disk> {
        self.device_changes.iter().filter_map(|c| match &c.device {
            VirtualDevice::Disk(disk) => Some(disk),
            _ => None,
        })
    }

    pub fn ethernet_cards(&self) -> impl Iterator<Item = &EthernetCard> {
        self.device_changes.iter().filter_map(|c| match &c.device {
            VirtualDevice::EthernetCard(nic) => Some(nic),
            _ => None,
        })
    }

    pub fn cdroms(&self) -> impl Iterator<Item = &Cdrom> {
        self.device_changes.iter().filter_map(|c| match &c.device {
            VirtualDevice::Cdrom(cdrom) => Some(cdrom),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceChange {
    pub operation: DeviceOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_operation: Option<FileOperation>,
    pub device: VirtualDevice,
}

impl DeviceChange {
    pub fn add(device: VirtualDevice) -> Self {
        Self {
            operation: DeviceOperation::Add,
            file_operation: None,
            device,
        }
    }

    pub fn create_file(device: VirtualDevice) -> Self {
        Self {
            operation: DeviceOperation::Add,
            file_operation: Some(FileOperation::Create),
            device,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOperation {
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileOperation {
    Create,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VirtualDevice {
    ScsiController(ScsiController),
    Disk(Disk),
    Cdrom(Cdrom),
    EthernetCard(EthernetCard),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScsiController {
    pub kind: ControllerKind,
    pub key: i32,              // temporary (negative) until the platform assigns one
    pub controller_key: i32,
    pub bus_number: u32,
    pub pci_slot_number: u32,
    pub unit_number: u32,
    pub scsi_ctlr_unit_number: u32,
    pub hot_add_remove: bool,
    pub shared_bus: SharedBus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SharedBus {
    NoSharing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub controller_key: i32,
    pub unit_number: u32,
    pub capacity_in_kb: u64,
    pub backing: DiskBacking,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskBacking {
    pub file_name: String,
    pub thin_provisioned: bool,
    pub disk_mode: DiskMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskMode {
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cdrom {
    pub key: i32,
    pub controller_key: i32,
    pub backing: CdromBacking,
    pub connectable: ConnectInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CdromBacking {
    RemotePassthrough { use_auto_detect: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthernetCard {
    pub kind: NicKind,
    pub backing: NetworkBacking,
    pub connectable: ConnectInfo,
    pub wake_on_lan_enabled: bool,
    pub address_type: AddressType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkBacking {
    pub network: String,       // platform identifier of the network
    pub device_name: String,   // network name as written in the batch document
    pub use_auto_detect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressType {
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectInfo {
    pub start_connected: bool,
    pub allow_guest_control: bool,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A device already attached to a machine, as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub key: i32,
    pub kind: DeviceKind,
    #[serde(default)]
    pub attached: Vec<i32>,    // keys of child devices (controllers only)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    PciController,
    IdeController,
    ScsiController,
    Disk,
    Cdrom,
    EthernetCard,
    #[serde(other)]
    Other,
}
