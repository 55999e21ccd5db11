pub mod settings;

pub use settings::{
    generate_default_config, BatchPolicy, HostSettings, PlacementPolicy, ProvisioningSettings,
    Settings, TaskSettings,
};
