use anyhow::Result;
use clap::Parser;
use kfd_device_plugin::app::Application;
use kfd_device_plugin::config::Cli;
use kfd_device_plugin::config::Commands;
use kfd_device_plugin::config::DaemonArgs;
use kfd_device_plugin::config::HardwareArgs;
use kfd_device_plugin::config::PluginConfig;
use kfd_device_plugin::hardware::Hardware;
use kfd_device_plugin::hardware::KfdHardware;
use utils::version;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    utils::logging::init(cli.log_format);

    match cli.command {
        Commands::Daemon(daemon_args) => run_daemon(daemon_args).await,
        Commands::Probe(hardware_args) => run_probe(hardware_args),
    }
}

async fn run_daemon(daemon_args: DaemonArgs) -> Result<()> {
    tracing::info!("Starting kfd device plugin {}", &**version::VERSION);

    let app = Application::new(PluginConfig::from(&daemon_args))?;
    app.run().await
}

fn run_probe(hardware_args: HardwareArgs) -> Result<()> {
    let hardware = KfdHardware::new(&hardware_args.kfd_root, &hardware_args.control_device)
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;

    println!(
        "kfd root {}: {}",
        hardware_args.kfd_root.display(),
        if hardware_args.kfd_root.exists() {
            "present"
        } else {
            "absent"
        }
    );
    println!("gpu count: {}", hardware.count_units());
    println!(
        "control device {}: {}",
        hardware_args.control_device.display(),
        if hardware.is_available() {
            "healthy"
        } else {
            "unhealthy"
        }
    );
    Ok(())
}
