//! Registration manager: turns resource kind announcements into served and
//! kubelet-registered device plugins, and re-registers them whenever the
//! kubelet restarts.

mod server;

use core::error::Error;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;

use error_stack::Report;
use error_stack::ResultExt;
use notify::Config;
use notify::Event;
use notify::EventKind;
use notify::RecommendedWatcher;
use notify::RecursiveMode;
use notify::Watcher;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;

pub use server::create_uds_channel;
pub use server::register_with_kubelet;
pub use server::PluginServer;

use crate::discovery::Lister;
use crate::plugin::ResourceKind;

/// Socket the kubelet serves its `Registration` service on.
pub const KUBELET_SOCKET: &str = "kubelet.sock";

/// Errors that can occur while serving and registering plugins.
#[derive(Debug, derive_more::Display)]
pub enum ManagerError {
    #[display("Failed to bind plugin socket {}", path.display())]
    SocketBind { path: PathBuf },
    #[display("Failed to connect to {}", path.display())]
    Connect { path: PathBuf },
    #[display("Failed to register {resource_name} with kubelet")]
    Registration { resource_name: String },
    #[display("Failed to watch {}", path.display())]
    Watch { path: PathBuf },
}

impl Error for ManagerError {}

/// Socket file name of a plugin, e.g. `amd.com_gpu.sock`.
pub fn plugin_endpoint(namespace: &str, kind: &ResourceKind) -> String {
    format!("{namespace}_{kind}.sock")
}

/// Name the kubelet schedules on, e.g. `amd.com/gpu`.
pub fn resource_name(namespace: &str, kind: &ResourceKind) -> String {
    format!("{namespace}/{kind}")
}

pub struct Manager {
    lister: Arc<Lister>,
    /// kubelet device plugin directory, holds `kubelet.sock` and our sockets
    plugin_dir: PathBuf,
}

impl Manager {
    pub fn new(lister: Arc<Lister>, plugin_dir: impl Into<PathBuf>) -> Self {
        Self {
            lister,
            plugin_dir: plugin_dir.into(),
        }
    }

    /// Runs discovery and keeps one registered plugin per announced kind
    /// until `stop` fires.
    pub async fn run(&self, stop: CancellationToken) -> Result<(), Report<ManagerError>> {
        let (fs_tx, mut fs_rx) = mpsc::channel(16);
        let _watcher = self.watch_plugin_dir(fs_tx)?;

        let (announce_tx, mut announce_rx) = mpsc::channel(1);
        let discovery = {
            let lister = self.lister.clone();
            let stop = stop.child_token();
            tokio::spawn(async move { lister.discover(announce_tx, stop).await })
        };

        let mut wanted = BTreeSet::new();
        let mut live = BTreeMap::new();

        loop {
            select! {
                _ = stop.cancelled() => {
                    info!("device plugin manager shutdown requested");
                    break;
                }
                Some(kinds) = announce_rx.recv() => {
                    wanted = kinds.into_iter().collect();
                    self.reconcile(&wanted, &mut live).await;
                }
                Some(event) = fs_rx.recv() => {
                    if is_kubelet_restart(&event) {
                        info!("kubelet socket created, restarting device plugins");
                        for (_, server) in std::mem::take(&mut live) {
                            server.stop().await;
                        }
                        self.reconcile(&wanted, &mut live).await;
                    }
                }
            }
        }

        for (_, server) in live {
            server.stop().await;
        }
        if let Err(e) = discovery.await {
            error!("resource discovery task failed: {e}");
        }
        Ok(())
    }

    /// Stops plugins whose kind is gone and starts missing ones.
    async fn reconcile(
        &self,
        wanted: &BTreeSet<ResourceKind>,
        live: &mut BTreeMap<ResourceKind, PluginServer>,
    ) {
        let gone: Vec<ResourceKind> = live
            .keys()
            .filter(|kind| !wanted.contains(*kind))
            .cloned()
            .collect();
        for kind in gone {
            if let Some(server) = live.remove(&kind) {
                info!(%kind, "resource kind retracted");
                server.stop().await;
            }
        }

        for kind in wanted {
            if live.contains_key(kind) {
                continue;
            }
            match self.start_plugin(kind).await {
                Ok(server) => {
                    live.insert(kind.clone(), server);
                }
                // retried on the next kubelet restart
                Err(e) => error!(%kind, "failed to start device plugin: {e:?}"),
            }
        }
    }

    async fn start_plugin(&self, kind: &ResourceKind) -> Result<PluginServer, Report<ManagerError>> {
        let namespace = self.lister.resource_namespace();
        let endpoint = plugin_endpoint(namespace, kind);

        let plugin = self.lister.new_plugin(kind.clone());
        let server = PluginServer::start(plugin, self.plugin_dir.join(&endpoint)).await?;

        let registration = register_with_kubelet(
            &self.plugin_dir.join(KUBELET_SOCKET),
            &endpoint,
            &resource_name(namespace, kind),
        )
        .await;
        if let Err(e) = registration {
            server.stop().await;
            return Err(e);
        }
        Ok(server)
    }

    fn watch_plugin_dir(
        &self,
        events: mpsc::Sender<Event>,
    ) -> Result<RecommendedWatcher, Report<ManagerError>> {
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    debug!("plugin directory event: {:?}", event);
                    // runs on the watcher thread; ignore a closed receiver
                    let _ = events.blocking_send(event);
                }
                Err(e) => error!("plugin directory watch error: {e:?}"),
            },
            Config::default(),
        )
        .change_context(ManagerError::Watch {
            path: self.plugin_dir.clone(),
        })?;

        watcher
            .watch(&self.plugin_dir, RecursiveMode::NonRecursive)
            .change_context(ManagerError::Watch {
                path: self.plugin_dir.clone(),
            })?;
        Ok(watcher)
    }
}

fn is_kubelet_restart(event: &Event) -> bool {
    matches!(event.kind, EventKind::Create(_))
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(OsStr::new(KUBELET_SOCKET)))
}
