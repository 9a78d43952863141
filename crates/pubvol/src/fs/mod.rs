//! Filesystem backends and type dispatch.
//!
//! The lifecycle core only depends on the [`FilesystemBackend`] and
//! [`Prober`] contracts; [`VfatBackend`], [`NtfsBackend`] and
//! [`BlkidProber`] are the default wiring against the platform tools.

use std::path::Path;

use pubvol_common::VolResult;

mod ntfs;
mod probe;
mod vfat;

pub use ntfs::NtfsBackend;
pub use probe::BlkidProber;
pub use vfat::VfatBackend;

/// Filesystem types a public volume may mount.
pub const SUPPORTED_FSTYPES: [&str; 2] = ["vfat", "ntfs"];

/// Whether `fstype` is in the mountable set.
#[must_use]
pub fn is_supported(fstype: &str) -> bool {
    SUPPORTED_FSTYPES.contains(&fstype)
}

/// Result of an untrusted metadata probe.
#[derive(Debug, Clone, Default)]
pub struct FsProbe {
    /// Detected filesystem type (e.g. "vfat", "ntfs").
    pub fstype: String,
    /// Filesystem UUID, if the medium carries one.
    pub uuid: Option<String>,
    /// Filesystem label, if set.
    pub label: Option<String>,
}

/// Extract type/UUID/label from a raw device without mounting it.
pub trait Prober: Send + Sync {
    /// Probe `device`. The device contents are untrusted input.
    fn probe_untrusted(&self, device: &Path) -> VolResult<FsProbe>;
}

/// Parameters for mounting a checked filesystem.
#[derive(Debug, Clone)]
pub struct MountParams {
    /// Mount read-only.
    pub read_only: bool,
    /// Disallow device special files.
    pub no_dev: bool,
    /// Disallow direct execution from the medium.
    pub no_exec: bool,
    /// Owner uid for all files.
    pub uid: u32,
    /// Owner gid for all files.
    pub gid: u32,
    /// Permission mask applied to files and directories.
    pub mask: u32,
    /// Whether to apply `mask` (execute-permission masking).
    pub use_mask: bool,
}

impl MountParams {
    /// Parameters for a media volume owned by the media-access user.
    #[must_use]
    pub const fn media(uid: u32, gid: u32) -> Self {
        Self {
            read_only: false,
            no_dev: false,
            no_exec: false,
            uid,
            gid,
            mask: 0o007,
            use_mask: true,
        }
    }
}

/// Options for formatting a device.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Limit the filesystem to this many sectors; 0 means the whole device.
    pub num_sectors: u64,
}

/// Per-filesystem-type check/mount/format operations.
pub trait FilesystemBackend: Send + Sync {
    /// The type this backend handles.
    fn fstype(&self) -> &'static str;

    /// Run the consistency check. `Err` means the check failed.
    fn check(&self, device: &Path) -> VolResult<()>;

    /// Mount `device` at `target`.
    fn mount(&self, device: &Path, target: &Path, params: &MountParams) -> VolResult<()>;

    /// Format `device`.
    fn format(&self, device: &Path, options: &FormatOptions) -> VolResult<()>;
}

/// Backend selection policy for mounting.
pub struct FsDispatch {
    vfat: Box<dyn FilesystemBackend>,
    ntfs: Box<dyn FilesystemBackend>,
}

impl FsDispatch {
    /// Build a dispatch from explicit backends.
    #[must_use]
    pub fn new(vfat: Box<dyn FilesystemBackend>, ntfs: Box<dyn FilesystemBackend>) -> Self {
        Self { vfat, ntfs }
    }

    /// Dispatch wired to the platform tool backends.
    #[must_use]
    pub fn system() -> Self {
        Self::new(
            Box::new(VfatBackend::default()),
            Box::new(NtfsBackend::default()),
        )
    }

    /// Select the backend to mount with.
    ///
    /// vfat's consistency check runs first; only when it fails is the NTFS
    /// check tried. The probed filesystem label plays no part here: vfat is
    /// the preferred type and NTFS the fallback branch regardless of what
    /// the metadata probe reported.
    pub fn select(&self, device: &Path) -> VolResult<&dyn FilesystemBackend> {
        match self.vfat.check(device) {
            Ok(()) => Ok(self.vfat.as_ref()),
            Err(vfat_err) => {
                tracing::debug!(
                    device = %device.display(),
                    error = %vfat_err,
                    "vfat check failed, trying ntfs"
                );
                match self.ntfs.check(device) {
                    Ok(()) => Ok(self.ntfs.as_ref()),
                    Err(ntfs_err) => {
                        tracing::warn!(
                            device = %device.display(),
                            vfat = %vfat_err,
                            ntfs = %ntfs_err,
                            "Failed filesystem check"
                        );
                        Err(ntfs_err)
                    }
                }
            }
        }
    }

    /// The vfat backend, the only type format() accepts.
    #[must_use]
    pub fn vfat(&self) -> &dyn FilesystemBackend {
        self.vfat.as_ref()
    }
}

impl std::fmt::Debug for FsDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsDispatch")
            .field("vfat", &self.vfat.fstype())
            .field("ntfs", &self.ntfs.fstype())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pubvol_common::VolError;
    use std::path::PathBuf;

    struct FakeBackend {
        fstype: &'static str,
        check_ok: bool,
    }

    impl FilesystemBackend for FakeBackend {
        fn fstype(&self) -> &'static str {
            self.fstype
        }

        fn check(&self, _device: &Path) -> VolResult<()> {
            if self.check_ok {
                Ok(())
            } else {
                Err(VolError::Io(std::io::Error::other("check failed")))
            }
        }

        fn mount(&self, _: &Path, _: &Path, _: &MountParams) -> VolResult<()> {
            Ok(())
        }

        fn format(&self, _: &Path, _: &FormatOptions) -> VolResult<()> {
            Ok(())
        }
    }

    fn dispatch(vfat_ok: bool, ntfs_ok: bool) -> FsDispatch {
        FsDispatch::new(
            Box::new(FakeBackend {
                fstype: "vfat",
                check_ok: vfat_ok,
            }),
            Box::new(FakeBackend {
                fstype: "ntfs",
                check_ok: ntfs_ok,
            }),
        )
    }

    #[test]
    fn vfat_wins_when_both_pass() {
        let d = dispatch(true, true);
        let backend = d.select(&PathBuf::from("/dev/null")).unwrap();
        assert_eq!(backend.fstype(), "vfat");
    }

    #[test]
    fn ntfs_is_the_fallback() {
        let d = dispatch(false, true);
        let backend = d.select(&PathBuf::from("/dev/null")).unwrap();
        assert_eq!(backend.fstype(), "ntfs");
    }

    #[test]
    fn both_failing_is_an_error() {
        let d = dispatch(false, false);
        assert!(d.select(&PathBuf::from("/dev/null")).is_err());
    }

    #[test]
    fn supported_set() {
        assert!(is_supported("vfat"));
        assert!(is_supported("ntfs"));
        assert!(!is_supported("exfat"));
        assert!(!is_supported(""));
    }
}
