pub mod devices;
pub mod inventory;
pub mod spec;
pub mod task;
pub mod vm;

// exports for the rest of the crate
pub use devices::{ConfigChange, DeviceChange, DeviceInfo, DeviceKind, VirtualDevice};
pub use inventory::{InventoryObject, ObjectId, ObjectKind};
pub use spec::{load_batch, parse_batch};
pub use task::{Operation, TaskHandle, TaskInfo, TaskState};
pub use vm::{ControllerKind, ControllerSpec, DiskSpec, MachineConfig, MachineSpec, NicKind};
