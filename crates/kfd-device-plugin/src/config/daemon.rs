use clap::{Args, Parser};
use std::path::PathBuf;

#[derive(Args, Clone, Debug)]
pub struct HardwareArgs {
    #[arg(
        long,
        env = "KFD_ROOT",
        value_hint = clap::ValueHint::DirPath,
        default_value = "/sys/class/kfd",
        help = "KFD sysfs root, present only when the ROCm kernel driver is loaded"
    )]
    pub kfd_root: PathBuf,

    #[arg(
        long,
        env = "KFD_CONTROL_DEVICE",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/dev/kfd",
        help = "KFD control device opened by the health check"
    )]
    pub control_device: PathBuf,
}

#[derive(Parser, Clone, Debug)]
pub struct DaemonArgs {
    #[arg(
        long,
        env = "KFD_PLUGIN_PULSE",
        default_value_t = 0,
        help = "Time between health check polling in seconds. Set to 0 to disable."
    )]
    pub pulse: u64,

    #[arg(
        long,
        env = "KFD_PLUGIN_DISCOVERY_INTERVAL",
        default_value_t = 0,
        help = "Time between checks for the KFD root in seconds. Set to 0 to check once at startup."
    )]
    pub discovery_interval: u64,

    #[arg(
        long,
        env = "DEVICE_PLUGIN_PATH",
        value_hint = clap::ValueHint::DirPath,
        default_value = "/var/lib/kubelet/device-plugins",
        help = "Kubelet device plugin directory"
    )]
    pub device_plugin_path: PathBuf,

    #[command(flatten)]
    pub hardware: HardwareArgs,
}
