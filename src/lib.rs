pub mod cli;
pub mod config;
pub mod core;
pub mod errors;
pub mod platform;
pub mod provisioning;

// Re-exports
pub use config::Settings;
pub use core::{load_batch, MachineSpec};
pub use errors::{ProvisionError, ProvisionResult};
pub use platform::{HostConnector, ManagementApi, RestConnector, SimulatedPlatform};
pub use provisioning::{BatchReport, ProvisionOutcome, Provisioner, TaskWaiter};
