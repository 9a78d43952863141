//! NTFS backend: read-mostly fallback for media formatted off-device.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::process::Command;

use pubvol_common::{VolError, VolResult};

use super::{FilesystemBackend, FormatOptions, MountParams};

/// NTFS check/mount via `ntfsfix` and the in-kernel driver.
#[derive(Debug, Clone)]
pub struct NtfsBackend {
    ntfsfix: PathBuf,
}

impl Default for NtfsBackend {
    fn default() -> Self {
        Self {
            ntfsfix: PathBuf::from("ntfsfix"),
        }
    }
}

impl NtfsBackend {
    /// Backend using an explicit `ntfsfix` path.
    #[must_use]
    pub fn with_tool(ntfsfix: impl Into<PathBuf>) -> Self {
        Self {
            ntfsfix: ntfsfix.into(),
        }
    }

    fn kernel_mount(
        device: &Path,
        target: &Path,
        fstype: &str,
        params: &MountParams,
    ) -> VolResult<()> {
        use rustix::mount::{MountFlags, mount};

        let mut flags = MountFlags::NODEV | MountFlags::NOSUID;
        if params.read_only {
            flags |= MountFlags::RDONLY;
        }
        if params.no_exec {
            flags |= MountFlags::NOEXEC;
        }

        let mut data = format!("uid={},gid={}", params.uid, params.gid);
        if params.use_mask {
            data.push_str(&format!(",fmask={:o},dmask={:o}", params.mask, params.mask));
        }

        let data = CString::new(data).map_err(|_| VolError::InvalidArgument {
            message: "mount data contains NUL".to_string(),
        })?;
        mount(device, target, fstype, flags, data.as_c_str()).map_err(|e| VolError::Io(e.into()))?;

        Ok(())
    }
}

impl FilesystemBackend for NtfsBackend {
    fn fstype(&self) -> &'static str {
        "ntfs"
    }

    fn check(&self, device: &Path) -> VolResult<()> {
        tracing::debug!(device = %device.display(), "Running ntfs check");

        // -n: check only, no repairs on an untrusted medium
        let status = Command::new(&self.ntfsfix)
            .arg("-n")
            .arg(device)
            .status()
            .map_err(VolError::Io)?;

        if status.success() {
            Ok(())
        } else {
            Err(VolError::Io(std::io::Error::other(format!(
                "ntfsfix on {} failed: {status}",
                device.display()
            ))))
        }
    }

    fn mount(&self, device: &Path, target: &Path, params: &MountParams) -> VolResult<()> {
        tracing::debug!(
            device = %device.display(),
            target = %target.display(),
            "Mounting ntfs"
        );

        // Prefer the ntfs3 driver, fall back to the legacy read-only one.
        match Self::kernel_mount(device, target, "ntfs3", params) {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::debug!(error = %first, "ntfs3 mount failed, trying legacy driver");
                Self::kernel_mount(device, target, "ntfs", params).map_err(|_| first)
            }
        }
    }

    fn format(&self, device: &Path, _options: &FormatOptions) -> VolResult<()> {
        Err(VolError::InvalidArgument {
            message: format!("formatting {} as ntfs is not supported", device.display()),
        })
    }
}
