//! vfat backend: fsck/mkfs tool invocation and kernel mount.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::process::Command;

use pubvol_common::{VolError, VolResult};

use super::{FilesystemBackend, FormatOptions, MountParams};

/// vfat check/mount/format via `fsck.fat`/`mkfs.fat` and the kernel driver.
#[derive(Debug, Clone)]
pub struct VfatBackend {
    fsck: PathBuf,
    mkfs: PathBuf,
}

impl Default for VfatBackend {
    fn default() -> Self {
        Self {
            fsck: PathBuf::from("fsck.fat"),
            mkfs: PathBuf::from("mkfs.fat"),
        }
    }
}

impl VfatBackend {
    /// Backend using explicit tool paths.
    #[must_use]
    pub fn with_tools(fsck: impl Into<PathBuf>, mkfs: impl Into<PathBuf>) -> Self {
        Self {
            fsck: fsck.into(),
            mkfs: mkfs.into(),
        }
    }
}

impl FilesystemBackend for VfatBackend {
    fn fstype(&self) -> &'static str {
        "vfat"
    }

    fn check(&self, device: &Path) -> VolResult<()> {
        tracing::debug!(device = %device.display(), "Running vfat check");

        let status = Command::new(&self.fsck)
            .arg("-a")
            .arg(device)
            .status()
            .map_err(VolError::Io)?;

        // Exit 1 means errors were found and corrected.
        match status.code() {
            Some(0 | 1) => Ok(()),
            _ => Err(VolError::Io(std::io::Error::other(format!(
                "fsck.fat on {} failed: {status}",
                device.display()
            )))),
        }
    }

    fn mount(&self, device: &Path, target: &Path, params: &MountParams) -> VolResult<()> {
        use rustix::mount::{MountFlags, mount};

        let mut flags = MountFlags::NODEV | MountFlags::NOSUID | MountFlags::DIRSYNC;
        if params.read_only {
            flags |= MountFlags::RDONLY;
        }
        if params.no_exec {
            flags |= MountFlags::NOEXEC;
        }

        let mut data = format!("utf8,uid={},gid={},shortname=mixed", params.uid, params.gid);
        if params.use_mask {
            data.push_str(&format!(",fmask={:o},dmask={:o}", params.mask, params.mask));
        }

        tracing::debug!(
            device = %device.display(),
            target = %target.display(),
            data = %data,
            "Mounting vfat"
        );

        let data = CString::new(data).map_err(|_| VolError::InvalidArgument {
            message: "mount data contains NUL".to_string(),
        })?;
        mount(device, target, "vfat", flags, data.as_c_str()).map_err(|e| VolError::Io(e.into()))?;

        Ok(())
    }

    fn format(&self, device: &Path, options: &FormatOptions) -> VolResult<()> {
        tracing::info!(device = %device.display(), "Formatting as vfat");

        let mut cmd = Command::new(&self.mkfs);
        cmd.args(["-F", "32"]);
        if options.num_sectors > 0 {
            cmd.arg(device).arg(options.num_sectors.to_string());
        } else {
            cmd.arg(device);
        }

        let status = cmd.status().map_err(VolError::Io)?;
        if !status.success() {
            return Err(VolError::Io(std::io::Error::other(format!(
                "mkfs.fat on {} failed: {status}",
                device.display()
            ))));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_surfaces_missing_tool() {
        let backend = VfatBackend::with_tools("/nonexistent/fsck.fat", "/nonexistent/mkfs.fat");
        let err = backend.check(Path::new("/dev/null")).unwrap_err();
        assert!(matches!(err, VolError::Io(_)));
    }

    #[test]
    fn format_surfaces_missing_tool() {
        let backend = VfatBackend::with_tools("/nonexistent/fsck.fat", "/nonexistent/mkfs.fat");
        let err = backend
            .format(Path::new("/dev/null"), &FormatOptions::default())
            .unwrap_err();
        assert!(matches!(err, VolError::Io(_)));
    }
}
