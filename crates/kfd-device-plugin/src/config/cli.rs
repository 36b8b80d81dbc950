use clap::{Parser, Subcommand};
use utils::logging::LogFormat;
use utils::version;

use crate::config::daemon::{DaemonArgs, HardwareArgs};

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        env = "LOG_FORMAT",
        default_value_t = LogFormat::Text,
        help = "Log output format"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Advertise KFD GPUs to the kubelet
    Daemon(DaemonArgs),
    /// Print the GPU count and control device health, then exit
    Probe(HardwareArgs),
}
