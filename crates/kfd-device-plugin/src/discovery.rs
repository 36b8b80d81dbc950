//! Resource kind discovery and the plugin factory used by the manager.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc;
use tokio::time::interval_at;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::hardware::Hardware;
use crate::heartbeat::Heartbeat;
use crate::plugin::KfdDevicePlugin;
use crate::plugin::ResourceKind;

/// Vendor namespace of every advertised resource.
pub const RESOURCE_NAMESPACE: &str = "amd.com";
/// The single kind exposed when KFD is present.
pub const GPU_KIND: &str = "gpu";

/// Announces which resource kinds exist on this node and builds their plugins.
pub struct Lister {
    /// `/sys/class/kfd` only exists once the ROCm kernel driver is loaded
    kfd_root: PathBuf,
    /// zero checks once at startup
    discovery_interval: Duration,
    hardware: Arc<dyn Hardware>,
    heartbeat: Heartbeat,
}

impl Lister {
    pub fn new(
        kfd_root: impl Into<PathBuf>,
        discovery_interval: Duration,
        hardware: Arc<dyn Hardware>,
        heartbeat: Heartbeat,
    ) -> Self {
        Self {
            kfd_root: kfd_root.into(),
            discovery_interval,
            hardware,
            heartbeat,
        }
    }

    pub fn resource_namespace(&self) -> &'static str {
        RESOURCE_NAMESPACE
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    /// Kinds present right now.
    pub fn present_kinds(&self) -> Vec<ResourceKind> {
        if self.kfd_root.exists() {
            vec![ResourceKind::from(GPU_KIND)]
        } else {
            vec![]
        }
    }

    /// Publishes the list of present kinds on `announcements` until `stop`.
    ///
    /// Without a discovery interval the subsystem root is checked once and
    /// only a non-empty list is ever published. With one, every change is
    /// published, an empty list retracting the kind.
    pub async fn discover(
        &self,
        announcements: mpsc::Sender<Vec<ResourceKind>>,
        stop: CancellationToken,
    ) {
        let mut announced = self.present_kinds();
        if announced.is_empty() {
            info!("{} not found, no resources to advertise", self.kfd_root.display());
        } else if !announce(&announcements, &stop, announced.clone()).await {
            return;
        }

        if self.discovery_interval.is_zero() {
            stop.cancelled().await;
            info!("resource discovery stopped");
            return;
        }

        let mut ticker = interval_at(
            Instant::now() + self.discovery_interval,
            self.discovery_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = stop.cancelled() => {
                    info!("resource discovery stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let kinds = self.present_kinds();
                    if kinds == announced {
                        continue;
                    }
                    info!(?kinds, "resource kinds changed");
                    if !announce(&announcements, &stop, kinds.clone()).await {
                        return;
                    }
                    announced = kinds;
                }
            }
        }
    }

    /// Builds the plugin for `kind`; all plugins share one heartbeat.
    pub fn new_plugin(&self, kind: ResourceKind) -> Arc<KfdDevicePlugin> {
        debug!(%kind, "creating device plugin");
        KfdDevicePlugin::new(kind, self.hardware.clone(), self.heartbeat.clone())
    }
}

/// false when discovery should end
async fn announce(
    announcements: &mpsc::Sender<Vec<ResourceKind>>,
    stop: &CancellationToken,
    kinds: Vec<ResourceKind>,
) -> bool {
    select! {
        sent = announcements.send(kinds) => {
            if sent.is_err() {
                warn!("resource announcement receiver dropped");
            }
            sent.is_ok()
        }
        _ = stop.cancelled() => {
            info!("resource discovery stopped");
            false
        }
    }
}
