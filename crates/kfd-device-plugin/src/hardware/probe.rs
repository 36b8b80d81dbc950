use std::fs::File;
use std::path::Path;
use std::path::PathBuf;

use tracing::error;

/// The KFD control node. There is one per machine, shared by every GPU, so
/// its openability is the health of the whole subsystem.
#[derive(Debug, Clone)]
pub struct ControlDevice {
    path: PathBuf,
}

impl ControlDevice {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Opens the node read-only and closes it again.
    pub fn is_available(&self) -> bool {
        match File::open(&self.path) {
            Ok(_) => true,
            Err(e) => {
                error!("Error opening {}: {e}", self.path.display());
                false
            }
        }
    }
}
