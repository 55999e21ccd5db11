//! The per-machine pipeline:
//! idempotency check -> create -> media -> network -> storage.
//!
//! Every step waits for its task before the next one starts. The first
//! unrecoverable error ends the machine and is reported as `Failed` with the
//! stage it happened in; nothing later in the pipeline runs after that.

use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::allocator::AllocationState;
use super::inventory::InventoryResolver;
use super::ranker::StorageRanker;
use super::waiter::TaskWaiter;
use crate::config::{PlacementPolicy, ProvisioningSettings};
use crate::core::devices::{
    AddressType, Cdrom, CdromBacking, ConfigChange, ConnectInfo, DeviceChange, DeviceInfo,
    DeviceKind, EthernetCard, NetworkBacking, VirtualDevice, IDE_CONTROLLER_CAPACITY,
};
use crate::core::{MachineConfig, MachineSpec, ObjectId, ObjectKind, Operation};
use crate::errors::{ProvisionError, ProvisionResult};
use crate::platform::ManagementApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// The idempotency check itself could not be answered.
    Lookup,
    Create,
    Network,
    Storage,
    Timeout,
    Cancelled,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Lookup => write!(f, "lookup"),
            FailureStage::Create => write!(f, "create"),
            FailureStage::Network => write!(f, "network"),
            FailureStage::Storage => write!(f, "storage"),
            FailureStage::Timeout => write!(f, "timeout"),
            FailureStage::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug)]
pub enum ProvisionOutcome {
    Created {
        machine: ObjectId,
        volume: String,
        /// Best-effort steps that did not work out.
        warnings: Vec<String>,
    },
    Skipped {
        machine: ObjectId,
    },
    Failed {
        stage: FailureStage,
        error: ProvisionError,
    },
}

impl ProvisionOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ProvisionOutcome::Failed { .. })
    }
}

// Waiting errors outrank the step they happened in.
fn failure(step: FailureStage, error: ProvisionError) -> ProvisionOutcome {
    let stage = match error {
        ProvisionError::Timeout { .. } => FailureStage::Timeout,
        ProvisionError::Cancelled { .. } => FailureStage::Cancelled,
        _ => step,
    };
    ProvisionOutcome::Failed { stage, error }
}

pub struct Provisioner {
    api: Arc<dyn ManagementApi>,
    waiter: TaskWaiter,
    settings: ProvisioningSettings,
}

impl Provisioner {
    pub fn new(api: Arc<dyn ManagementApi>, waiter: TaskWaiter, settings: ProvisioningSettings) -> Self {
        Self { api, waiter, settings }
    }

    pub fn settings(&self) -> &ProvisioningSettings {
        &self.settings
    }

    pub fn waiter(&self) -> &TaskWaiter {
        &self.waiter
    }

    pub(crate) fn api(&self) -> &dyn ManagementApi {
        self.api.as_ref()
    }

    fn resolver(&self) -> InventoryResolver<'_> {
        InventoryResolver::new(self.api.as_ref())
    }

    /// Provisions one machine. Safe to call in a loop: it never panics on
    /// remote failures and never touches state shared with other machines.
    pub async fn provision(&self, spec: &MachineSpec) -> ProvisionOutcome {
        match self.resolver().resolve(ObjectKind::Machine, &spec.name).await {
            Ok(Some(machine)) => {
                info!(machine = %spec.name, id = %machine, "Machine already exists, skipping");
                return ProvisionOutcome::Skipped { machine };
            }
            Ok(None) => {}
            Err(e) => {
                error!(machine = %spec.name, error = %e, "Existence check failed");
                return failure(FailureStage::Lookup, e);
            }
        }

        info!(
            machine = %spec.name,
            cpus = spec.cpu_count,
            memory_mb = spec.memory_mb,
            "Creating machine"
        );

        let volume = match self.placement_volume().await {
            Ok(volume) => volume,
            Err(e) => return self.report(spec, failure(FailureStage::Create, e)),
        };

        let machine = match self.create(spec, &volume).await {
            Ok(machine) => machine,
            Err(e) => return self.report(spec, failure(FailureStage::Create, e)),
        };

        let mut warnings = Vec::new();
        match self.attach_media(&machine).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(machine = %spec.name, "No IDE controller with a free slot, skipping CD-ROM");
                warnings.push("no free IDE controller; CD-ROM not attached".to_string());
            }
            // the media task may still be running; nothing else goes to this machine
            Err(e @ (ProvisionError::Timeout { .. } | ProvisionError::Cancelled { .. })) => {
                return self.report(spec, failure(FailureStage::Create, e));
            }
            Err(e) => {
                warn!(machine = %spec.name, error = %e, "CD-ROM attach failed, continuing");
                warnings.push(format!("CD-ROM not attached: {}", e));
            }
        }

        if let Err(e) = self.attach_network(&machine, spec).await {
            return self.report(spec, failure(FailureStage::Network, e));
        }

        if let Err(e) = self.attach_storage(&machine, spec, &volume).await {
            return self.report(spec, failure(FailureStage::Storage, e));
        }

        info!(machine = %spec.name, id = %machine, %volume, "Machine provisioned");
        ProvisionOutcome::Created {
            machine,
            volume,
            warnings,
        }
    }

    fn report(&self, spec: &MachineSpec, outcome: ProvisionOutcome) -> ProvisionOutcome {
        if let ProvisionOutcome::Failed { stage, error } = &outcome {
            error!(machine = %spec.name, %stage, error = %error, "Provisioning failed");
        }
        outcome
    }

    async fn placement_volume(&self) -> ProvisionResult<String> {
        match self.settings.placement {
            PlacementPolicy::Fixed => Ok(self.settings.default_volume.clone()),
            PlacementPolicy::MostFreeSpace => {
                let ranking = StorageRanker::new(self.api.as_ref()).rank().await?;
                Ok(ranking
                    .into_iter()
                    .next()
                    .unwrap_or_else(|| self.settings.default_volume.clone()))
            }
        }
    }

    async fn create(&self, spec: &MachineSpec, volume: &str) -> ProvisionResult<ObjectId> {
        let config = MachineConfig::for_spec(spec, volume, &self.settings.hardware_version);
        let task = self.api.submit_create(&config).await?;
        let result = self.waiter.wait(self.api.as_ref(), &task, Operation::Create).await?;

        match result {
            Some(id) => Ok(ObjectId(id)),
            // some hosts don't echo the new id back; look it up instead
            None => self.resolver().require(ObjectKind::Machine, &spec.name).await,
        }
    }

    /// `Ok(false)` when every IDE controller is already full.
    async fn attach_media(&self, machine: &ObjectId) -> ProvisionResult<bool> {
        let devices = self.api.machine_devices(machine).await?;
        let Some(controller) = find_free_ide_controller(&devices) else {
            return Ok(false);
        };

        let change = ConfigChange::new(vec![DeviceChange::add(VirtualDevice::Cdrom(Cdrom {
            key: -1,
            controller_key: controller.key,
            backing: CdromBacking::RemotePassthrough {
                use_auto_detect: false,
            },
            connectable: ConnectInfo {
                start_connected: true,
                allow_guest_control: true,
                connected: false,
                status: None,
            },
        }))]);

        self.submit_and_wait(machine, &change, Operation::AttachMedia).await?;
        Ok(true)
    }

    async fn attach_network(&self, machine: &ObjectId, spec: &MachineSpec) -> ProvisionResult<()> {
        let network = self.resolver().require(ObjectKind::Network, &spec.network).await?;
        info!(machine = %spec.name, network = %spec.network, nic = %spec.nic_kind, "Adding network adapter");

        let change = ConfigChange::new(vec![DeviceChange::add(VirtualDevice::EthernetCard(
            EthernetCard {
                kind: spec.nic_kind,
                backing: NetworkBacking {
                    network: network.0,
                    device_name: spec.network.clone(),
                    use_auto_detect: false,
                },
                connectable: ConnectInfo {
                    start_connected: true,
                    allow_guest_control: true,
                    connected: true,
                    status: Some("untried".to_string()),
                },
                wake_on_lan_enabled: false,
                address_type: AddressType::Generated,
            },
        ))]);

        self.submit_and_wait(machine, &change, Operation::AttachNetwork).await
    }

    async fn attach_storage(&self, machine: &ObjectId, spec: &MachineSpec, volume: &str) -> ProvisionResult<()> {
        // fresh counters for every machine
        let mut allocation = AllocationState::new();

        for (index, controller) in spec.controllers.iter().enumerate() {
            info!(
                machine = %spec.name,
                controller = %controller.kind,
                disks = controller.disks.len(),
                bus = allocation.bus_number,
                slot = allocation.pci_slot_number,
                "Adding storage controller"
            );
            let change = allocation.allocate(controller, volume);
            if let Err(e) = self.submit_and_wait(machine, &change, Operation::AttachStorage).await {
                // already attached controllers stay where they are
                warn!(machine = %spec.name, attached = index, total = spec.controllers.len(), "Storage left partially attached");
                return Err(e);
            }
        }
        Ok(())
    }

    async fn submit_and_wait(
        &self,
        machine: &ObjectId,
        change: &ConfigChange,
        operation: Operation,
    ) -> ProvisionResult<()> {
        let task = self.api.submit_reconfigure(machine, change).await?;
        self.waiter.wait(self.api.as_ref(), &task, operation).await?;
        Ok(())
    }
}

fn find_free_ide_controller(devices: &[DeviceInfo]) -> Option<&DeviceInfo> {
    devices
        .iter()
        .find(|d| d.kind == DeviceKind::IdeController && d.attached.len() < IDE_CONTROLLER_CAPACITY)
}
