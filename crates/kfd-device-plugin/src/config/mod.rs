pub mod cli;
pub mod daemon;

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration of the daemon, derived from the CLI.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Zero disables health polling.
    pub pulse: Duration,
    /// Zero checks for the KFD root once.
    pub discovery_interval: Duration,
    pub kfd_root: PathBuf,
    pub control_device: PathBuf,
    pub device_plugin_path: PathBuf,
}

impl From<&daemon::DaemonArgs> for PluginConfig {
    fn from(args: &daemon::DaemonArgs) -> Self {
        Self {
            pulse: Duration::from_secs(args.pulse),
            discovery_interval: Duration::from_secs(args.discovery_interval),
            kfd_root: args.hardware.kfd_root.clone(),
            control_device: args.hardware.control_device.clone(),
            device_plugin_path: args.device_plugin_path.clone(),
        }
    }
}

pub use cli::*;
pub use daemon::*;
