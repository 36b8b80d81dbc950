use std::time::Duration;

use anyhow::anyhow;
use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;

/// Time granted to tasks to finish after cancellation.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<Result<()>>>,
    cancellation_token: CancellationToken,
}

impl Default for Tasks {
    fn default() -> Self {
        Self::new()
    }
}

impl Tasks {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, app: &Application) {
        // a disabled heartbeat returns at once and must not end the daemon
        if !app.heartbeat().pulse().is_zero() {
            let heartbeat_task = self.spawn_heartbeat_task(app);
            self.tasks.push(heartbeat_task);
        }

        let manager_task = self.spawn_manager_task(app);
        self.tasks.push(manager_task);
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        let signal_handler = {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::spawn(async move {
                tokio::select! {
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM, initiating graceful shutdown");
                    }
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT, initiating graceful shutdown");
                    }
                }
            })
        };

        let result = tokio::select! {
            _ = signal_handler => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                Ok(())
            }
            // Wait for any task to complete unexpectedly
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, index, remaining) = result;
                drop(remaining);
                // polled to completion, must not be awaited again
                drop(self.tasks.remove(index));
                // every task is meant to outlive the daemon until cancelled
                match result {
                    Err(e) => {
                        tracing::error!("Task panicked: {e}");
                        Err(e.into())
                    }
                    Ok(Err(e)) => {
                        tracing::error!("Task failed: {e}");
                        Err(e)
                    }
                    Ok(Ok(())) => {
                        tracing::error!("Task completed unexpectedly");
                        Err(anyhow!("task completed before shutdown was requested"))
                    }
                }
            }
        };

        self.cancellation_token.cancel();
        self.wait_for_tasks_with_timeout(SHUTDOWN_TIMEOUT).await;
        result
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                match task.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::error!("Task failed during shutdown: {e}"),
                    Err(e) => tracing::error!("Task panicked during shutdown: {e}"),
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_heartbeat_task(&self, app: &Application) -> JoinHandle<Result<()>> {
        let heartbeat = app.heartbeat().clone();
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting heartbeat task");
            heartbeat.run(token).await;
            tracing::info!("Heartbeat task completed");
            Ok(())
        })
    }

    fn spawn_manager_task(&self, app: &Application) -> JoinHandle<Result<()>> {
        let manager = app.manager().clone();
        let token = self.cancellation_token.clone();
        tokio::spawn(async move {
            tracing::info!("Starting device plugin manager task");
            manager
                .run(token)
                .await
                .map_err(|e| anyhow!("device plugin manager failed: {e:?}"))?;
            tracing::info!("Device plugin manager task completed");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_log::test;

    use super::*;
    use crate::config::PluginConfig;

    fn config(root: &std::path::Path, device_plugin_path: std::path::PathBuf) -> PluginConfig {
        PluginConfig {
            pulse: Duration::ZERO,
            discovery_interval: Duration::ZERO,
            kfd_root: root.join("kfd"),
            control_device: root.join("dev-kfd"),
            device_plugin_path,
        }
    }

    #[test(tokio::test)]
    async fn unwatchable_plugin_dir_fails_the_run() {
        let root = tempfile::tempdir().expect("should create temp dir");
        let app = Application::new(config(root.path(), root.path().join("absent/device-plugins")))
            .expect("valid configuration");

        let result = tokio::time::timeout(Duration::from_secs(10), app.run())
            .await
            .expect("run should end on its own");

        let error = result.expect_err("a failed manager must fail the run");
        assert!(
            format!("{error}").contains("device plugin manager failed"),
            "unexpected error: {error}"
        );
    }

    #[test(tokio::test)]
    async fn task_ending_early_is_an_error() {
        let mut tasks = Tasks::new();
        tasks.tasks.push(tokio::spawn(async { Ok(()) }));

        let result = tasks.wait_for_completion().await;
        assert!(result.is_err(), "early completion must not look like a clean shutdown");
    }
}
