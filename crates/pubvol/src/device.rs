//! Device node lifecycle service.

use std::path::Path;

use pubvol_common::{VolError, VolResult};

/// Create/destroy device special files and query the device backing a path.
pub trait DeviceNodeService: Send + Sync {
    /// Create a block device node at `path` for `major:minor`.
    ///
    /// An already-existing node is treated as success.
    fn create(&self, path: &Path, major: u32, minor: u32) -> VolResult<()>;

    /// Remove the device node at `path`.
    fn destroy(&self, path: &Path) -> VolResult<()>;

    /// Device id (`st_dev`) of the filesystem backing `path`.
    fn device_id_of(&self, path: &Path) -> VolResult<u64>;
}

/// [`DeviceNodeService`] implementation against the real kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevNodes;

impl DeviceNodeService for DevNodes {
    fn create(&self, path: &Path, major: u32, minor: u32) -> VolResult<()> {
        use rustix::fs::{CWD, FileType, Mode, makedev, mknodat};

        tracing::debug!(path = %path.display(), major, minor, "Creating device node");

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match mknodat(
            CWD,
            path,
            FileType::BlockDevice,
            Mode::from_raw_mode(0o600),
            makedev(major, minor),
        ) {
            Ok(()) => Ok(()),
            // A node left behind by a previous run is fine
            Err(rustix::io::Errno::EXIST) => Ok(()),
            Err(e) => Err(VolError::Io(e.into())),
        }
    }

    fn destroy(&self, path: &Path) -> VolResult<()> {
        tracing::debug!(path = %path.display(), "Destroying device node");
        rustix::fs::unlink(path).map_err(|e| VolError::Io(e.into()))?;
        Ok(())
    }

    fn device_id_of(&self, path: &Path) -> VolResult<u64> {
        let stat = rustix::fs::stat(path).map_err(|e| VolError::Io(e.into()))?;
        #[allow(clippy::unnecessary_cast)]
        Ok(stat.st_dev as u64)
    }
}
