//! Device plugin for one resource kind.

pub mod allocator;
pub mod service;
pub mod session;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::hardware::Hardware;
use crate::heartbeat::Heartbeat;

pub use allocator::HostBinding;
pub use service::DevicePluginService;
pub use session::DeviceRecord;
pub use session::DeviceSession;
pub use session::Health;
pub use session::ResourceKind;
pub use session::SessionEnd;
pub use session::Snapshot;

/// Plugin serving one resource kind.
///
/// A plugin is single use: once stopped, every session it spawned ends and
/// the manager builds a fresh one if the kind has to be served again.
pub struct KfdDevicePlugin {
    kind: ResourceKind,
    hardware: Arc<dyn Hardware>,
    heartbeat: Heartbeat,
    stop: CancellationToken,
}

impl KfdDevicePlugin {
    pub fn new(kind: ResourceKind, hardware: Arc<dyn Hardware>, heartbeat: Heartbeat) -> Arc<Self> {
        Arc::new(Self {
            kind,
            hardware,
            heartbeat,
            stop: CancellationToken::new(),
        })
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    /// A session subscribed to the heartbeat from this point on.
    pub fn session(&self) -> DeviceSession {
        DeviceSession::new(
            self.kind.clone(),
            self.hardware.clone(),
            self.heartbeat.subscribe(),
            self.stop.child_token(),
        )
    }

    /// Ends every session of this plugin.
    pub fn stop(&self) {
        info!(kind = %self.kind, "stopping device plugin");
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn stopped(&self) {
        self.stop.cancelled().await;
    }
}

impl std::fmt::Debug for KfdDevicePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KfdDevicePlugin")
            .field("kind", &self.kind)
            .field("pulse", &self.heartbeat.pulse())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}
