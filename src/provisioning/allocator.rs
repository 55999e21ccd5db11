//! Hardware addressing for storage controllers and their disks.
//!
//! Each machine gets its own `AllocationState`; counters only ever move
//! forward and are never shared between machines.

use crate::core::devices::{
    ConfigChange, Disk, DiskBacking, DiskMode, DeviceChange, ScsiController, SharedBus,
    VirtualDevice, PCI_CONTROLLER_KEY, SCSI_CONTROLLER_INITIATOR_UNIT,
};
use crate::core::vm::{volume_path, ControllerSpec};

pub const FIRST_CONTROLLER_UNIT_NUMBER: u32 = 3;
pub const FIRST_PCI_SLOT_NUMBER: u32 = 16;
pub const FIRST_BUS_NUMBER: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationState {
    pub controller_unit_number: u32,
    pub pci_slot_number: u32,
    // NOTE: bumped per controller like the other two counters; unconfirmed
    // whether sibling controllers are really meant to sit on separate buses
    pub bus_number: u32,
}

impl AllocationState {
    pub fn new() -> Self {
        Self {
            controller_unit_number: FIRST_CONTROLLER_UNIT_NUMBER,
            pci_slot_number: FIRST_PCI_SLOT_NUMBER,
            bus_number: FIRST_BUS_NUMBER,
        }
    }

    // New devices need a negative placeholder key until the platform assigns
    // one. Slot numbers are unique per machine, so they make a handy source.
    fn temporary_key(&self) -> i32 {
        -(self.pci_slot_number as i32)
    }

    fn advance(&mut self) {
        self.controller_unit_number += 1;
        self.pci_slot_number += 1;
        self.bus_number += 1;
    }

    /// Builds the reconfigure payload for one controller and its disks, then
    /// moves every counter forward by one.
    pub fn allocate(&mut self, controller: &ControllerSpec, volume: &str) -> ConfigChange {
        let scsi = ScsiController {
            kind: controller.kind,
            key: self.temporary_key(),
            controller_key: PCI_CONTROLLER_KEY,
            bus_number: self.bus_number,
            pci_slot_number: self.pci_slot_number,
            unit_number: self.controller_unit_number,
            scsi_ctlr_unit_number: SCSI_CONTROLLER_INITIATOR_UNIT,
            hot_add_remove: true,
            shared_bus: SharedBus::NoSharing,
        };

        let mut changes = Vec::with_capacity(controller.disks.len() + 1);
        for (unit_number, disk) in controller.disks.iter().enumerate() {
            changes.push(DeviceChange::create_file(VirtualDevice::Disk(Disk {
                controller_key: scsi.key,
                unit_number: unit_number as u32,
                capacity_in_kb: disk.capacity_kb(),
                backing: DiskBacking {
                    file_name: volume_path(volume),
                    thin_provisioned: true,
                    disk_mode: DiskMode::Persistent,
                },
            })));
        }
        // disks reference the controller by its temporary key, controller goes last
        changes.push(DeviceChange::add(VirtualDevice::ScsiController(scsi)));

        self.advance();
        ConfigChange::new(changes)
    }
}

impl Default for AllocationState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::devices::FileOperation;
    use crate::core::vm::{ControllerKind, DiskSpec};

    fn controller(kind: ControllerKind, sizes: &[u64]) -> ControllerSpec {
        ControllerSpec {
            kind,
            disks: sizes.iter().map(|&capacity_gb| DiskSpec { capacity_gb }).collect(),
        }
    }

    #[test]
    fn first_controller_uses_starting_addresses() {
        let mut state = AllocationState::new();
        let change = state.allocate(&controller(ControllerKind::LsiLogicParallel, &[40]), "datastore1");

        let ctrl = change.controllers().next().unwrap();
        assert_eq!(ctrl.kind, ControllerKind::LsiLogicParallel);
        assert_eq!(ctrl.controller_key, 100);
        assert_eq!(ctrl.bus_number, 0);
        assert_eq!(ctrl.pci_slot_number, 16);
        assert_eq!(ctrl.unit_number, 3);
        assert!(ctrl.hot_add_remove);
        assert_eq!(ctrl.shared_bus, SharedBus::NoSharing);
        assert!(ctrl.key < 0);

        let disk = change.disks().next().unwrap();
        assert_eq!(disk.unit_number, 0);
        assert_eq!(disk.capacity_in_kb, 40 * 1024 * 1024);
        assert_eq!(disk.controller_key, ctrl.key);
        assert!(disk.backing.thin_provisioned);
        assert_eq!(disk.backing.disk_mode, DiskMode::Persistent);
        assert_eq!(disk.backing.file_name, "[datastore1]");
    }

    #[test]
    fn kth_controller_is_offset_by_k() {
        let mut state = AllocationState::new();
        let specs = [
            controller(ControllerKind::LsiLogicParallel, &[10, 20]),
            controller(ControllerKind::Paravirtual, &[30]),
            controller(ControllerKind::Paravirtual, &[40, 50, 60]),
        ];

        let mut keys = Vec::new();
        for (k, spec) in specs.iter().enumerate() {
            let change = state.allocate(spec, "datastore1");
            let ctrl = change.controllers().next().unwrap();
            let k = k as u32;
            assert_eq!(ctrl.bus_number, FIRST_BUS_NUMBER + k);
            assert_eq!(ctrl.pci_slot_number, FIRST_PCI_SLOT_NUMBER + k);
            assert_eq!(ctrl.unit_number, FIRST_CONTROLLER_UNIT_NUMBER + k);

            // disk units restart at zero on every controller
            let units: Vec<u32> = change.disks().map(|d| d.unit_number).collect();
            let expected: Vec<u32> = (0..spec.disks.len() as u32).collect();
            assert_eq!(units, expected);
            assert!(change.disks().all(|d| d.controller_key == ctrl.key));
            keys.push(ctrl.key);
        }

        keys.dedup();
        assert_eq!(keys.len(), 3, "controller keys must differ within a machine");
        assert_eq!(state.bus_number, 3);
        assert_eq!(state.pci_slot_number, 19);
        assert_eq!(state.controller_unit_number, 6);
    }

    #[test]
    fn disks_are_created_and_controller_is_added() {
        let mut state = AllocationState::new();
        let change = state.allocate(&controller(ControllerKind::Paravirtual, &[1, 2]), "fast");

        assert_eq!(change.device_changes.len(), 3);
        let (disks, ctrl) = change.device_changes.split_at(2);
        assert!(disks.iter().all(|c| c.file_operation == Some(FileOperation::Create)));
        assert_eq!(ctrl[0].file_operation, None);
    }

    #[test]
    fn controller_without_disks_still_advances() {
        let mut state = AllocationState::new();
        let change = state.allocate(&controller(ControllerKind::Paravirtual, &[]), "datastore1");
        assert_eq!(change.disks().count(), 0);
        assert_eq!(change.controllers().count(), 1);
        assert_eq!(state, AllocationState { controller_unit_number: 4, pci_slot_number: 17, bus_number: 1 });
    }

    #[test]
    fn machines_do_not_share_counters() {
        let mut first = AllocationState::new();
        first.allocate(&controller(ControllerKind::Paravirtual, &[10]), "datastore1");

        let mut second = AllocationState::new();
        let change = second.allocate(&controller(ControllerKind::Paravirtual, &[10]), "datastore1");
        assert_eq!(change.controllers().next().unwrap().pci_slot_number, FIRST_PCI_SLOT_NUMBER);
    }
}
