//! Access to the KFD hardware subsystem.
//!
//! Two questions are answered here, both synchronously and without holding
//! any state between calls:
//! - how many usable GPU nodes does the topology tree describe ([`Topology`])
//! - can the control device be opened right now ([`ControlDevice`])

use core::error::Error;
use std::path::Path;

use error_stack::Report;

pub mod probe;
pub mod topology;

pub use probe::ControlDevice;
pub use topology::Topology;

/// Errors raised while setting up hardware access.
#[derive(Debug, derive_more::Display)]
pub enum HardwareError {
    #[display("Invalid topology glob pattern: {pattern}")]
    InvalidTopologyPattern { pattern: String },
}

impl Error for HardwareError {}

/// Hardware view used by device sessions.
pub trait Hardware: Send + Sync + 'static {
    /// Number of usable units, never fails.
    fn count_units(&self) -> usize;

    /// Whether the subsystem is usable at call time.
    fn is_available(&self) -> bool;
}

/// Production hardware backed by the KFD sysfs tree and control device node.
#[derive(Debug, Clone)]
pub struct KfdHardware {
    topology: Topology,
    control_device: ControlDevice,
}

impl KfdHardware {
    /// Fails only when the topology glob built from `kfd_root` is malformed.
    pub fn new(
        kfd_root: impl AsRef<Path>,
        control_device: impl AsRef<Path>,
    ) -> Result<Self, Report<HardwareError>> {
        Ok(Self {
            topology: Topology::new(kfd_root)?,
            control_device: ControlDevice::new(control_device),
        })
    }
}

impl Hardware for KfdHardware {
    fn count_units(&self) -> usize {
        self.topology.count_units()
    }

    fn is_available(&self) -> bool {
        self.control_device.is_available()
    }
}
