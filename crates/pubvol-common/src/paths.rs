//! Filesystem path schema for volume runtime state.
//!
//! All mount points and device nodes live under fixed system roots. The
//! whole schema can be relocated under a scratch root for tests.

use std::path::{Path, PathBuf};

use crate::id::VolumeId;

/// Schema of the fixed directories a public volume touches.
///
/// Every runtime path is derived from the volume's stable name so that the
/// same physical medium reuses its paths across remounts.
#[derive(Debug, Clone)]
pub struct VolPaths {
    root: PathBuf,
}

impl VolPaths {
    /// Schema rooted at `/`, the production layout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Relocate the whole schema under `root`.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root everything hangs off.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Device special file for a volume.
    #[must_use]
    pub fn device_node(&self, id: &VolumeId) -> PathBuf {
        self.root.join("dev/block/pubvol").join(id.to_string())
    }

    /// Raw mount point, where the kernel filesystem lands.
    #[must_use]
    pub fn raw(&self, stable_name: &str) -> PathBuf {
        self.root.join("mnt/media_rw").join(stable_name)
    }

    /// Default passthrough view.
    #[must_use]
    pub fn fuse_default(&self, stable_name: &str) -> PathBuf {
        self.root.join("mnt/runtime/default").join(stable_name)
    }

    /// Read-scoped passthrough view.
    #[must_use]
    pub fn fuse_read(&self, stable_name: &str) -> PathBuf {
        self.root.join("mnt/runtime/read").join(stable_name)
    }

    /// Write-scoped passthrough view.
    #[must_use]
    pub fn fuse_write(&self, stable_name: &str) -> PathBuf {
        self.root.join("mnt/runtime/write").join(stable_name)
    }

    /// Application-visible path for volumes mounted with the visible flag.
    #[must_use]
    pub fn storage(&self, stable_name: &str) -> PathBuf {
        self.root.join("storage").join(stable_name)
    }

    /// Well-known bind target for the legacy secure-container root.
    #[must_use]
    pub fn asec(&self) -> PathBuf {
        self.root.join("mnt/secure/asec")
    }
}

impl Default for VolPaths {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/"),
        }
    }
}
