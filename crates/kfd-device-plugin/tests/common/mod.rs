#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use tempfile::TempDir;

/// A fake node: KFD sysfs tree, control device and kubelet plugin directory.
pub struct FakeNode {
    pub dir: TempDir,
}

impl FakeNode {
    /// `gpus` nodes with a positive `simd_count` plus one CPU node.
    pub fn with_gpus(gpus: usize) -> Self {
        let dir = TempDir::new().expect("should create temp dir");
        let node = Self { dir };
        node.write_node(0, "cpu_cores_count 16\nsimd_count 0\n");
        for i in 1..=gpus {
            node.write_node(i, "cpu_cores_count 0\nsimd_count 256\nmax_waves_per_simd 10\n");
        }
        fs::write(node.control_device(), b"").expect("should create control device");
        fs::create_dir_all(node.plugin_dir()).expect("should create plugin dir");
        node
    }

    fn write_node(&self, index: usize, properties: &str) {
        let dir = self.kfd_root().join(format!("topology/nodes/{index}"));
        fs::create_dir_all(&dir).expect("should create node dir");
        fs::write(dir.join("properties"), properties).expect("should write properties");
    }

    pub fn kfd_root(&self) -> PathBuf {
        self.dir.path().join("sys/class/kfd")
    }

    pub fn control_device(&self) -> PathBuf {
        self.dir.path().join("kfd")
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.dir.path().join("device-plugins")
    }

    pub fn remove_control_device(&self) {
        fs::remove_file(self.control_device()).expect("should remove control device");
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}
