use std::fs::File;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::sync::LazyLock;

use error_stack::Report;
use error_stack::ResultExt;
use regex::Regex;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::HardwareError;

/// Per-node property files, relative to the KFD root.
const NODE_PROPERTIES: &str = "topology/nodes/*/properties";

/// CPU nodes report `simd_count 0`, GPU nodes a positive count.
static SIMD_COUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"simd_count\s(\d+)").expect("simd_count regex"));

/// Counts GPU nodes described by the KFD topology tree.
#[derive(Debug, Clone)]
pub struct Topology {
    pattern: String,
}

impl Topology {
    pub fn new(kfd_root: impl AsRef<Path>) -> Result<Self, Report<HardwareError>> {
        let pattern = format!("{}/{NODE_PROPERTIES}", kfd_root.as_ref().display());
        glob::Pattern::new(&pattern).change_context(HardwareError::InvalidTopologyPattern {
            pattern: pattern.clone(),
        })?;
        Ok(Self { pattern })
    }

    /// One unit per node file whose `simd_count` is positive.
    ///
    /// Unreadable entries are logged and contribute nothing.
    pub fn count_units(&self) -> usize {
        let entries = match glob::glob(&self.pattern) {
            Ok(entries) => entries,
            Err(e) => {
                // validated in `new`
                error!("glob error for {}: {e}", self.pattern);
                return 0;
            }
        };

        let mut count = 0;
        for entry in entries {
            match entry {
                Ok(node_file) => {
                    if has_compute_units(&node_file) {
                        count += 1;
                    }
                }
                Err(e) => warn!("skipping unreadable topology entry: {e}"),
            }
        }
        count
    }
}

fn has_compute_units(node_file: &Path) -> bool {
    info!("Parsing {}", node_file.display());

    let file = match File::open(node_file) {
        Ok(file) => file,
        Err(e) => {
            warn!("failed to open {}: {e}", node_file.display());
            return false;
        }
    };

    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to read {}: {e}", node_file.display());
                return false;
            }
        };
        let Some(captures) = SIMD_COUNT.captures(&line) else {
            continue;
        };
        if captures[1].parse::<u64>().unwrap_or(0) > 0 {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use similar_asserts::assert_eq;
    use tempfile::TempDir;
    use test_log::test;

    use super::*;

    fn write_node(root: &Path, node: usize, properties: &str) {
        let dir = root.join(format!("topology/nodes/{node}"));
        fs::create_dir_all(&dir).expect("should create node dir");
        fs::write(dir.join("properties"), properties).expect("should write properties");
    }

    #[test]
    fn counts_nodes_with_positive_simd_count() {
        let root = TempDir::new().expect("should create temp dir");
        write_node(root.path(), 0, "cpu_cores_count 16\nsimd_count 0\nmem_banks_count 1\n");
        write_node(root.path(), 1, "cpu_cores_count 0\nsimd_count 256\n");
        write_node(root.path(), 2, "simd_count 240\nsimd_count 240\n");
        write_node(root.path(), 3, "mem_banks_count 1\n");

        let topology = Topology::new(root.path()).expect("valid pattern");
        assert_eq!(topology.count_units(), 2);
    }

    #[test]
    fn missing_topology_counts_zero() {
        let root = TempDir::new().expect("should create temp dir");
        let topology = Topology::new(root.path().join("absent")).expect("valid pattern");
        assert_eq!(topology.count_units(), 0);
    }

    #[test]
    fn unparsable_count_credits_nothing() {
        let root = TempDir::new().expect("should create temp dir");
        write_node(root.path(), 0, "simd_count 99999999999999999999999\n");
        write_node(root.path(), 1, "simd_count\t4\n");

        let topology = Topology::new(root.path()).expect("valid pattern");
        assert_eq!(topology.count_units(), 1);
    }

    #[test]
    fn later_zero_does_not_uncredit_node() {
        let root = TempDir::new().expect("should create temp dir");
        write_node(root.path(), 0, "simd_count 0\nsimd_count 8\n");

        let topology = Topology::new(root.path()).expect("valid pattern");
        assert_eq!(topology.count_units(), 1);
    }

    #[test]
    fn node_directory_without_properties_is_skipped() {
        let root = TempDir::new().expect("should create temp dir");
        write_node(root.path(), 0, "simd_count 64\n");
        fs::create_dir_all(root.path().join("topology/nodes/1")).expect("should create dir");
        // a directory named like the file cannot be read line by line
        fs::create_dir_all(root.path().join("topology/nodes/2/properties"))
            .expect("should create dir");

        let topology = Topology::new(root.path()).expect("valid pattern");
        assert_eq!(topology.count_units(), 1);
    }

    #[test]
    fn malformed_pattern_is_rejected() {
        let result = Topology::new("/sys/class/kfd[");
        let report = result.expect_err("pattern should be rejected");
        assert!(matches!(
            report.current_context(),
            HardwareError::InvalidTopologyPattern { .. }
        ));
    }
}
