//! Everything that turns a validated `MachineSpec` into a machine on the host.

pub mod allocator;
pub mod batch;
pub mod inventory;
pub mod orchestrator;
pub mod ranker;
pub mod waiter;

pub use allocator::AllocationState;
pub use batch::{BatchReport, MachineReport, MachineResult};
pub use inventory::InventoryResolver;
pub use orchestrator::{FailureStage, ProvisionOutcome, Provisioner};
pub use ranker::{rank_volumes, StorageRanker};
pub use waiter::{observe, TaskOutcome, TaskWaiter};
