use crate::api::DeviceSpec;

/// KFD control node, one per machine regardless of GPU count.
pub const KFD_DEVICE: &str = "/dev/kfd";
/// DRM card and render nodes.
pub const DRI_DEVICE: &str = "/dev/dri";

/// A host device node exposed inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinding {
    pub host_path: String,
    pub container_path: String,
    pub permissions: String,
}

impl HostBinding {
    fn read_write(path: &str) -> Self {
        Self {
            host_path: path.to_string(),
            container_path: path.to_string(),
            permissions: "rw".to_string(),
        }
    }
}

impl From<HostBinding> for DeviceSpec {
    fn from(binding: HostBinding) -> Self {
        DeviceSpec {
            container_path: binding.container_path,
            host_path: binding.host_path,
            permissions: binding.permissions,
        }
    }
}

/// Bindings granting access to the GPU subsystem.
///
/// KFD offers no per-GPU isolation, so every request gets the same pair
/// whatever `_requested` is.
pub fn allocate(_requested: usize) -> Vec<HostBinding> {
    vec![
        HostBinding::read_write(KFD_DEVICE),
        HostBinding::read_write(DRI_DEVICE),
    ]
}
