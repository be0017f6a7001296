//! Free-space probing for the dataset download precondition.

use std::path::Path;
use tracing::{info, warn};

use crate::error::{HubError, Result};

const GIB: f64 = (1u64 << 30) as f64;

/// Source of free-space figures for a directory
pub trait DiskProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// `statvfs`-based probe for the filesystem holding `path`
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsProbe;

#[cfg(unix)]
impl DiskProbe for StatvfsProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|e| HubError::Io(e.into()))?;
        Ok((stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64))
    }
}

#[cfg(not(unix))]
impl DiskProbe for StatvfsProbe {
    fn available_bytes(&self, _path: &Path) -> Result<u64> {
        Err(HubError::Internal(
            "free-space probing is only supported on unix".to_string(),
        ))
    }
}

/// Bytes that must be free to download a dataset of `dataset_bytes`.
pub fn required_bytes(dataset_bytes: u64, safety_factor: f64) -> u64 {
    let required = dataset_bytes as f64 * safety_factor.max(1.0);
    if required >= u64::MAX as f64 {
        u64::MAX
    } else {
        required.ceil() as u64
    }
}

/// Fail with `InsufficientDiskSpace` unless `path` has room for the dataset.
pub fn ensure_space(
    probe: &dyn DiskProbe,
    path: &Path,
    dataset_bytes: u64,
    safety_factor: f64,
) -> Result<()> {
    let available = probe.available_bytes(path)?;
    let required = required_bytes(dataset_bytes, safety_factor);

    info!(
        "Dataset download {:.3} GB, {:.1} GB free",
        dataset_bytes as f64 / GIB,
        available as f64 / GIB
    );

    if available > required {
        return Ok(());
    }

    warn!(
        "Insufficient free disk space: {:.1} GB < {:.3} GB required ({}x dataset)",
        available as f64 / GIB,
        required as f64 / GIB,
        safety_factor
    );
    Err(HubError::InsufficientDiskSpace {
        required_bytes: required,
        available_bytes: available,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct FixedProbe(pub u64);

    impl DiskProbe for FixedProbe {
        fn available_bytes(&self, _path: &Path) -> Result<u64> {
            Ok(self.0)
        }
    }

    #[test]
    fn test_required_bytes_applies_safety_factor() {
        assert_eq!(required_bytes(1_000, 2.0), 2_000);
        assert_eq!(required_bytes(1_000, 1.5), 1_500);
        // Factors below one never shrink the requirement
        assert_eq!(required_bytes(1_000, 0.5), 1_000);
        assert_eq!(required_bytes(u64::MAX, 2.0), u64::MAX);
    }

    #[test]
    fn test_ensure_space() {
        let path = Path::new(".");
        assert!(ensure_space(&FixedProbe(5_000), path, 2_000, 2.0).is_ok());

        match ensure_space(&FixedProbe(3_000), path, 2_000, 2.0) {
            Err(HubError::InsufficientDiskSpace {
                required_bytes,
                available_bytes,
            }) => {
                assert_eq!(required_bytes, 4_000);
                assert_eq!(available_bytes, 3_000);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_statvfs_reports_space_for_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StatvfsProbe.available_bytes(dir.path()).is_ok());
    }
}
