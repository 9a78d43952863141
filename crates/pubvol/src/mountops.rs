#![allow(unsafe_code)]
//! Mount and directory plumbing.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use pubvol_common::{VolError, VolResult};

// Linux block device ioctls (linux/fs.h).
const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;
const BLKDISCARD: libc::c_ulong = 0x1277;

/// Bind-mount, force-unmount and directory preparation primitives.
pub trait MountOps: Send + Sync {
    /// Create `path` if absent and set its mode and owner.
    fn prepare_dir(&self, path: &Path, mode: u32, uid: u32, gid: u32) -> VolResult<()>;

    /// Bind-mount `src` onto `dst`.
    fn bind_mount(&self, src: &Path, dst: &Path) -> VolResult<()>;

    /// Unmount `path`, escalating from forced to lazy detach.
    ///
    /// A path that is not a mount point (or does not exist) is success.
    fn force_unmount(&self, path: &Path) -> VolResult<()>;

    /// Remove an empty directory, tolerating "missing" and "not empty".
    fn remove_dir(&self, path: &Path) -> VolResult<()>;

    /// Discard all blocks of the device at `path`.
    fn wipe_block_device(&self, path: &Path) -> VolResult<()>;
}

/// [`MountOps`] implementation against the real kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysMountOps;

impl MountOps for SysMountOps {
    fn prepare_dir(&self, path: &Path, mode: u32, uid: u32, gid: u32) -> VolResult<()> {
        tracing::debug!(path = %path.display(), mode = format_args!("{mode:04o}"), uid, gid, "Preparing directory");

        if !path.exists() {
            std::fs::create_dir_all(path)?;
        }

        let meta = std::fs::metadata(path)?;
        if !meta.is_dir() {
            return Err(VolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotADirectory,
                format!("{} exists but is not a directory", path.display()),
            )));
        }

        rustix::fs::chmod(path, rustix::fs::Mode::from_raw_mode(mode))
            .map_err(|e| VolError::Io(e.into()))?;

        let c_path = cstring(path)?;
        if unsafe { libc::chown(c_path.as_ptr(), uid, gid) } != 0 {
            return Err(VolError::Io(std::io::Error::last_os_error()));
        }

        Ok(())
    }

    fn bind_mount(&self, src: &Path, dst: &Path) -> VolResult<()> {
        use rustix::mount::{MountFlags, mount};

        tracing::debug!(src = %src.display(), dst = %dst.display(), "Creating bind mount");

        mount(src, dst, "", MountFlags::BIND, None).map_err(|e| VolError::Io(e.into()))?;

        Ok(())
    }

    fn force_unmount(&self, path: &Path) -> VolResult<()> {
        use rustix::io::Errno;
        use rustix::mount::{UnmountFlags, unmount};

        tracing::debug!(path = %path.display(), "Force unmounting");

        match unmount(path, UnmountFlags::FORCE) {
            Ok(()) => return Ok(()),
            // Not a mount point / already gone: nothing to reclaim
            Err(Errno::INVAL | Errno::NOENT) => return Ok(()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Forced unmount failed, detaching");
            }
        }

        match unmount(path, UnmountFlags::DETACH) {
            Ok(()) | Err(Errno::INVAL | Errno::NOENT) => Ok(()),
            Err(e) => Err(VolError::Io(e.into())),
        }
    }

    fn remove_dir(&self, path: &Path) -> VolResult<()> {
        match std::fs::remove_dir(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::ENOTEMPTY) => {
                tracing::warn!(path = %path.display(), "Mount point not empty, leaving in place");
                Ok(())
            }
            Err(e) => Err(VolError::Io(e)),
        }
    }

    fn wipe_block_device(&self, path: &Path) -> VolResult<()> {
        use std::os::fd::AsRawFd;

        let file = std::fs::OpenOptions::new().read(true).write(true).open(path)?;
        let fd = file.as_raw_fd();

        let mut size: u64 = 0;
        if unsafe { libc::ioctl(fd, BLKGETSIZE64, std::ptr::addr_of_mut!(size)) } != 0 {
            return Err(VolError::Io(std::io::Error::last_os_error()));
        }

        tracing::info!(path = %path.display(), size, "Discarding all blocks");

        let range: [u64; 2] = [0, size];
        if unsafe { libc::ioctl(fd, BLKDISCARD, range.as_ptr()) } != 0 {
            return Err(VolError::Io(std::io::Error::last_os_error()));
        }

        Ok(())
    }
}

fn cstring(path: &Path) -> VolResult<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| VolError::InvalidArgument {
        message: format!("path contains NUL: {}", path.display()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_dir_creates_with_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("raw");

        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        SysMountOps.prepare_dir(&dir, 0o700, uid, gid).unwrap();

        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn prepare_dir_rejects_file_in_the_way() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("raw");
        std::fs::write(&file, b"x").unwrap();

        let uid = unsafe { libc::getuid() };
        let gid = unsafe { libc::getgid() };
        assert!(SysMountOps.prepare_dir(&file, 0o700, uid, gid).is_err());
    }

    #[test]
    fn remove_dir_tolerates_missing() {
        let temp = tempfile::tempdir().unwrap();
        SysMountOps.remove_dir(&temp.path().join("absent")).unwrap();
    }

    #[test]
    fn remove_dir_tolerates_non_empty() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("busy");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("file"), b"x").unwrap();

        SysMountOps.remove_dir(&dir).unwrap();
        assert!(dir.exists());
    }

    #[test]
    fn force_unmount_tolerates_plain_dir() {
        // EINVAL for a directory that is not a mount point. Unprivileged
        // runs get EPERM instead, which is surfaced, so accept both.
        let temp = tempfile::tempdir().unwrap();
        match SysMountOps.force_unmount(temp.path()) {
            Ok(()) => {}
            Err(VolError::Io(e)) => assert_eq!(e.raw_os_error(), Some(libc::EPERM)),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}
