//! In-memory host. Tasks advance one state per poll, submissions are
//! recorded, and the outcome of each operation can be scripted. Used by the
//! test suite and by `--dry-run`.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::ManagementApi;
use crate::core::devices::{DeviceInfo, DeviceKind, VirtualDevice, PCI_CONTROLLER_KEY};
use crate::core::{
    ConfigChange, InventoryObject, MachineConfig, ObjectId, ObjectKind, Operation, TaskHandle,
    TaskInfo,
};
use crate::errors::{ProvisionError, ProvisionResult};

const IDE_CONTROLLER_KEYS: [i32; 2] = [200, 201];

/// How a submitted task ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskScript {
    Succeed,
    Fail(String),
    /// Never leaves `running`.
    Stall,
}

/// A recorded submission, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Create(MachineConfig),
    Reconfigure {
        machine: ObjectId,
        operation: Operation,
        change: ConfigChange,
    },
}

impl Submission {
    pub fn operation(&self) -> Operation {
        match self {
            Submission::Create(_) => Operation::Create,
            Submission::Reconfigure { operation, .. } => *operation,
        }
    }
}

#[derive(Debug)]
enum Effect {
    CreateMachine(MachineConfig),
    Reconfigure(ObjectId, ConfigChange),
}

#[derive(Debug)]
struct SimTask {
    script: TaskScript,
    polls: u32,
    effect: Option<Effect>,
    finished: Option<TaskInfo>,
}

#[derive(Debug)]
struct SimState {
    objects: Vec<InventoryObject>,
    devices: HashMap<ObjectId, Vec<DeviceInfo>>,
    tasks: HashMap<TaskHandle, SimTask>,
    submissions: Vec<Submission>,
    scripts: HashMap<Operation, VecDeque<TaskScript>>,
    next_device_key: i32,
    polls_to_finish: u32,
    ide_full: bool,
}

pub struct SimulatedPlatform {
    state: Mutex<SimState>,
}

impl SimulatedPlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                objects: Vec::new(),
                devices: HashMap::new(),
                tasks: HashMap::new(),
                submissions: Vec::new(),
                scripts: HashMap::new(),
                next_device_key: 1000,
                polls_to_finish: 2,
                ide_full: false,
            }),
        }
    }

    pub fn with_machine(mut self, name: &str) -> Self {
        let id = format!("vm-{}", Uuid::new_v4());
        let state = self.state.get_mut();
        state.devices.insert(ObjectId(id.clone()), default_devices(false));
        state.objects.push(InventoryObject::new(ObjectKind::Machine, id, name));
        self
    }

    pub fn with_network(mut self, name: &str) -> Self {
        let id = format!("network-{}", Uuid::new_v4());
        self.state
            .get_mut()
            .objects
            .push(InventoryObject::new(ObjectKind::Network, id, name));
        self
    }

    pub fn with_volume(mut self, name: &str, free_space_bytes: u64) -> Self {
        let id = format!("volume-{}", Uuid::new_v4());
        self.state
            .get_mut()
            .objects
            .push(InventoryObject::volume(id, name, free_space_bytes));
        self
    }

    /// Number of non-terminal polls before a task finishes (default 2).
    pub fn with_polls_to_finish(mut self, polls: u32) -> Self {
        self.state.get_mut().polls_to_finish = polls;
        self
    }

    /// New machines come up with both IDE controllers already occupied.
    pub fn with_full_ide_controllers(mut self) -> Self {
        self.state.get_mut().ide_full = true;
        self
    }

    /// Queues the outcome of the next unscripted submission of `operation`.
    /// Unscripted submissions succeed.
    pub fn script(mut self, operation: Operation, outcome: TaskScript) -> Self {
        self.state
            .get_mut()
            .scripts
            .entry(operation)
            .or_default()
            .push_back(outcome);
        self
    }

    pub async fn submissions(&self) -> Vec<Submission> {
        self.state.lock().await.submissions.clone()
    }

    pub async fn objects(&self, kind: ObjectKind) -> Vec<InventoryObject> {
        self.state
            .lock()
            .await
            .objects
            .iter()
            .filter(|o| o.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn devices_of(&self, machine: &ObjectId) -> Vec<DeviceInfo> {
        self.state
            .lock()
            .await
            .devices
            .get(machine)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for SimulatedPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimState {
    fn queue_task(&mut self, operation: Operation, effect: Effect) -> TaskHandle {
        let script = self
            .scripts
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(TaskScript::Succeed);
        let handle = TaskHandle(format!("task-{}", Uuid::new_v4()));
        self.tasks.insert(
            handle.clone(),
            SimTask {
                script,
                polls: 0,
                effect: Some(effect),
                finished: None,
            },
        );
        handle
    }

    fn apply(&mut self, effect: Effect) -> Option<String> {
        match effect {
            Effect::CreateMachine(config) => {
                let id = format!("vm-{}", Uuid::new_v4());
                self.devices
                    .insert(ObjectId(id.clone()), default_devices(self.ide_full));
                self.objects
                    .push(InventoryObject::new(ObjectKind::Machine, id.clone(), config.name));
                Some(id)
            }
            Effect::Reconfigure(machine, change) => {
                let mut next_key = self.next_device_key;
                let devices = self.devices.entry(machine).or_default();

                // new devices get real keys; temporary controller keys are remapped
                let mut assigned: HashMap<i32, i32> = HashMap::new();
                let mut links = Vec::new();
                for device_change in &change.device_changes {
                    let key = next_key;
                    next_key += 1;
                    let (kind, parent) = describe(&device_change.device);
                    if let VirtualDevice::ScsiController(ctrl) = &device_change.device {
                        assigned.insert(ctrl.key, key);
                    }
                    devices.push(DeviceInfo {
                        key,
                        kind,
                        attached: Vec::new(),
                    });
                    if let Some(parent) = parent {
                        links.push((parent, key));
                    }
                }

                for (parent, child) in links {
                    let parent = assigned.get(&parent).copied().unwrap_or(parent);
                    if let Some(owner) = devices.iter_mut().find(|d| d.key == parent) {
                        owner.attached.push(child);
                    }
                }
                self.next_device_key = next_key;
                None
            }
        }
    }
}

#[async_trait]
impl ManagementApi for SimulatedPlatform {
    async fn list_objects(&self, kind: ObjectKind) -> ProvisionResult<Vec<InventoryObject>> {
        Ok(self.objects(kind).await)
    }

    async fn machine_devices(&self, machine: &ObjectId) -> ProvisionResult<Vec<DeviceInfo>> {
        let state = self.state.lock().await;
        state
            .devices
            .get(machine)
            .cloned()
            .ok_or_else(|| ProvisionError::Platform(format!("no such machine: {}", machine)))
    }

    async fn submit_create(&self, config: &MachineConfig) -> ProvisionResult<TaskHandle> {
        let mut state = self.state.lock().await;
        debug!(machine = %config.name, "Simulated create submitted");
        state.submissions.push(Submission::Create(config.clone()));
        Ok(state.queue_task(Operation::Create, Effect::CreateMachine(config.clone())))
    }

    async fn submit_reconfigure(
        &self,
        machine: &ObjectId,
        change: &ConfigChange,
    ) -> ProvisionResult<TaskHandle> {
        let mut state = self.state.lock().await;
        if !state.devices.contains_key(machine) {
            return Err(ProvisionError::Platform(format!("no such machine: {}", machine)));
        }
        let operation = classify(change);
        debug!(%machine, %operation, "Simulated reconfigure submitted");
        state.submissions.push(Submission::Reconfigure {
            machine: machine.clone(),
            operation,
            change: change.clone(),
        });
        Ok(state.queue_task(operation, Effect::Reconfigure(machine.clone(), change.clone())))
    }

    async fn task_info(&self, task: &TaskHandle) -> ProvisionResult<TaskInfo> {
        let mut state = self.state.lock().await;
        let polls_to_finish = state.polls_to_finish;
        let sim = state
            .tasks
            .get_mut(task)
            .ok_or_else(|| ProvisionError::Platform(format!("no such task: {}", task)))?;

        if let Some(done) = &sim.finished {
            return Ok(done.clone());
        }

        sim.polls += 1;
        let first_poll = sim.polls == 1;
        if sim.script == TaskScript::Stall || sim.polls <= polls_to_finish {
            return Ok(if first_poll { TaskInfo::queued() } else { TaskInfo::running() });
        }

        let script = sim.script.clone();
        let effect = sim.effect.take();
        let info = match script {
            TaskScript::Fail(detail) => TaskInfo::error(detail),
            _ => {
                let result = effect.and_then(|effect| state.apply(effect));
                TaskInfo::success(result)
            }
        };
        if let Some(sim) = state.tasks.get_mut(task) {
            sim.finished = Some(info.clone());
        }
        Ok(info)
    }
}

// A fresh machine: the PCI root plus two IDE controllers.
fn default_devices(ide_full: bool) -> Vec<DeviceInfo> {
    let mut devices = vec![DeviceInfo {
        key: PCI_CONTROLLER_KEY,
        kind: DeviceKind::PciController,
        attached: Vec::new(),
    }];
    for key in IDE_CONTROLLER_KEYS {
        devices.push(DeviceInfo {
            key,
            kind: DeviceKind::IdeController,
            attached: if ide_full { vec![3000 + key, 3100 + key] } else { Vec::new() },
        });
    }
    devices
}

fn describe(device: &VirtualDevice) -> (DeviceKind, Option<i32>) {
    match device {
        VirtualDevice::ScsiController(ctrl) => (DeviceKind::ScsiController, Some(ctrl.controller_key)),
        VirtualDevice::Disk(disk) => (DeviceKind::Disk, Some(disk.controller_key)),
        VirtualDevice::Cdrom(cdrom) => (DeviceKind::Cdrom, Some(cdrom.controller_key)),
        VirtualDevice::EthernetCard(_) => (DeviceKind::EthernetCard, None),
    }
}

fn classify(change: &ConfigChange) -> Operation {
    if change.controllers().next().is_some() || change.disks().next().is_some() {
        Operation::AttachStorage
    } else if change.ethernet_cards().next().is_some() {
        Operation::AttachNetwork
    } else {
        Operation::AttachMedia
    }
}
