/*
* Provisioner configuration
* -------------------------
* Layers, lowest to highest priority:
*   1. hardcoded defaults (below)
*   2. <CONFIG_PATH>/default.toml
*   3. <CONFIG_PATH>/local.toml
*   4. VMPROV__* environment variables (e.g. VMPROV__HOST__PASSWORD)
*
* Both files are optional; a bare checkout runs on defaults alone.
*/

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub host: HostSettings,
    pub tasks: TaskSettings,
    pub provisioning: ProvisioningSettings,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct HostSettings {
    pub username: String,
    pub password: String,
    pub port: u16,
    pub verify_tls: bool,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

// hand-written so the password never lands in a log line
impl std::fmt::Debug for HostSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSettings")
            .field("username", &self.username)
            .field("password", &"***")
            .field("port", &self.port)
            .field("verify_tls", &self.verify_tls)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSettings {
    pub poll_interval_ms: u64,
    /// No deadline when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl TaskSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningSettings {
    pub default_volume: String,
    pub placement: PlacementPolicy,
    pub batch_policy: BatchPolicy,
    pub max_parallel: usize,
    pub hardware_version: String,
}

/// Where new machines are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    /// Volume with the most free space at the time the machine is created.
    MostFreeSpace,
    /// Always `default_volume`.
    Fixed,
}

/// What a failed machine means for the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    Continue,
    Abort,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            password: String::new(),
            port: 443,
            verify_tls: true,
            connect_timeout_secs: 10,
            request_timeout_secs: 30,
            max_retries: 3,
            retry_delay_ms: 500,
        }
    }
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            timeout_secs: None,
        }
    }
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            default_volume: "datastore1".to_string(),
            placement: PlacementPolicy::MostFreeSpace,
            batch_policy: BatchPolicy::Continue,
            max_parallel: 1,
            hardware_version: "vmx-11".to_string(),
        }
    }
}

impl Settings {
    /// Loads from `CONFIG_PATH` (default `config/`).
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
        Self::from_dir(Path::new(&config_path))
    }

    pub fn from_dir(config_path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from path: {}", config_path.display());
        let defaults = generate_default_config();

        let config = Config::builder()
            // Start with default settings
            .set_default("host.username", defaults.host.username)?
            .set_default("host.password", defaults.host.password)?
            .set_default("host.port", defaults.host.port as i64)?
            .set_default("host.verify_tls", defaults.host.verify_tls)?
            .set_default("host.connect_timeout_secs", defaults.host.connect_timeout_secs as i64)?
            .set_default("host.request_timeout_secs", defaults.host.request_timeout_secs as i64)?
            .set_default("host.max_retries", defaults.host.max_retries as i64)?
            .set_default("host.retry_delay_ms", defaults.host.retry_delay_ms as i64)?
            .set_default("tasks.poll_interval_ms", defaults.tasks.poll_interval_ms as i64)?
            .set_default("provisioning.default_volume", defaults.provisioning.default_volume)?
            .set_default("provisioning.placement", "most_free_space")?
            .set_default("provisioning.batch_policy", "continue")?
            .set_default("provisioning.max_parallel", defaults.provisioning.max_parallel as i64)?
            .set_default("provisioning.hardware_version", defaults.provisioning.hardware_version)?
            // Add configuration from files
            .add_source(File::with_name(&config_path.join("default").to_string_lossy()).required(false))
            .add_source(File::with_name(&config_path.join("local").to_string_lossy()).required(false))
            // Add environment variables, e.g. VMPROV__HOST__PASSWORD
            .add_source(
                Environment::with_prefix("VMPROV")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }
}

pub fn generate_default_config() -> Settings {
    Settings {
        host: HostSettings::default(),
        tasks: TaskSettings::default(),
        provisioning: ProvisioningSettings::default(),
    }
}
