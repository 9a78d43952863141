//! Volume lifecycle configuration.

use std::path::PathBuf;
use std::time::Duration;

use pubvol_common::VolPaths;

/// Uid of the media access user the raw filesystem is mounted as.
pub const MEDIA_RW_UID: u32 = 1023;
/// Gid of the media access group.
pub const MEDIA_RW_GID: u32 = 1023;

/// Configuration options for a volume lifecycle.
#[derive(Debug, Clone)]
pub struct VolumeConfig {
    /// Path schema for device nodes and mount points.
    pub paths: VolPaths,
    /// Passthrough daemon binary.
    pub fuse_binary: PathBuf,
    /// Uid the raw filesystem is owned by.
    pub media_uid: u32,
    /// Gid the raw filesystem is owned by.
    pub media_gid: u32,
    /// Interval between daemon readiness probes.
    pub spinup_poll: Duration,
    /// Deadline for the daemon to present its view before the spin-up
    /// is abandoned and the child reaped.
    pub spinup_deadline: Duration,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            paths: VolPaths::new(),
            fuse_binary: PathBuf::from("/system/bin/sdcard"),
            media_uid: MEDIA_RW_UID,
            media_gid: MEDIA_RW_GID,
            spinup_poll: Duration::from_millis(50),
            spinup_deadline: Duration::from_secs(15),
        }
    }
}

impl VolumeConfig {
    /// Relocate the path schema, typically under a scratch directory.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.paths = VolPaths::with_root(root);
        self
    }

    /// Use a different passthrough daemon binary.
    #[must_use]
    pub fn with_fuse_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.fuse_binary = binary.into();
        self
    }

    /// Set the daemon spin-up deadline.
    #[must_use]
    pub const fn with_spinup_deadline(mut self, deadline: Duration) -> Self {
        self.spinup_deadline = deadline;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = VolumeConfig::default();
        assert_eq!(config.fuse_binary, PathBuf::from("/system/bin/sdcard"));
        assert_eq!(config.media_uid, 1023);
        assert_eq!(config.spinup_poll, Duration::from_millis(50));
    }

    #[test]
    fn builder_pattern() {
        let config = VolumeConfig::default()
            .with_root("/tmp/vol")
            .with_fuse_binary("/usr/bin/sdcard")
            .with_spinup_deadline(Duration::from_secs(2));

        assert_eq!(config.paths.root(), std::path::Path::new("/tmp/vol"));
        assert_eq!(config.spinup_deadline, Duration::from_secs(2));
    }
}
