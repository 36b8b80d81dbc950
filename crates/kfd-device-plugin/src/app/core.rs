use std::sync::Arc;

use anyhow::Result;

use crate::app::tasks::Tasks;
use crate::config::PluginConfig;
use crate::discovery::Lister;
use crate::hardware::KfdHardware;
use crate::heartbeat::Heartbeat;
use crate::manager::Manager;

/// Application core structure with explicit dependencies
pub struct Application {
    heartbeat: Heartbeat,
    manager: Arc<Manager>,
}

impl Application {
    /// Fails when the topology glob built from the KFD root is malformed.
    pub fn new(config: PluginConfig) -> Result<Self> {
        let hardware = KfdHardware::new(&config.kfd_root, &config.control_device)
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let heartbeat = Heartbeat::new(config.pulse);
        let lister = Arc::new(Lister::new(
            config.kfd_root.clone(),
            config.discovery_interval,
            Arc::new(hardware),
            heartbeat.clone(),
        ));
        let manager = Arc::new(Manager::new(lister, config.device_plugin_path.clone()));

        Ok(Self {
            heartbeat,
            manager,
        })
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!("Starting all application tasks...");

        let mut tasks = Tasks::new();
        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {}", e);
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }
}
