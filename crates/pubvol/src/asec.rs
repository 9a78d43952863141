//! Legacy secure-container (ASEC) staging.
//!
//! Primary volumes carry a per-volume directory of application secure
//! containers. Staging migrates the legacy directory name and exposes the
//! container root at a fixed system path via a bind mount.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pubvol_common::{VolError, VolResult};

use crate::mountops::MountOps;

const LEGACY_DIR: &str = "android_secure";
const SECURE_DIR: &str = ".android_secure";

/// One-time-per-mount ASEC directory migration and exposure.
pub struct AsecStager {
    mount_ops: Arc<dyn MountOps>,
    asec_path: PathBuf,
}

impl AsecStager {
    /// Stager binding the container root onto `asec_path`.
    #[must_use]
    pub fn new(mount_ops: Arc<dyn MountOps>, asec_path: PathBuf) -> Self {
        Self {
            mount_ops,
            asec_path,
        }
    }

    /// Stage the secure-container root under a freshly mounted `raw_path`.
    ///
    /// Only a failure to create the container directory is an error; the
    /// legacy rename and the bind mount are best effort.
    pub fn stage(&self, raw_path: &Path) -> VolResult<()> {
        let legacy = raw_path.join(LEGACY_DIR);
        let secure = raw_path.join(SECURE_DIR);

        // Recover the legacy secure path
        if legacy.exists() && !secure.exists() {
            if let Err(e) = std::fs::rename(&legacy, &secure) {
                tracing::warn!(
                    from = %legacy.display(),
                    to = %secure.display(),
                    error = %e,
                    "Failed to rename legacy ASEC dir"
                );
            }
        }

        match std::fs::create_dir(&secure) {
            Ok(()) => {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&secure, std::fs::Permissions::from_mode(0o700))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                tracing::warn!(path = %secure.display(), error = %e, "Creating ASEC stage failed");
                return Err(VolError::Io(e));
            }
        }

        if let Err(e) = self.mount_ops.bind_mount(&secure, &self.asec_path) {
            tracing::warn!(
                src = %secure.display(),
                dst = %self.asec_path.display(),
                error = %e,
                "Failed to bind ASEC stage"
            );
        }

        Ok(())
    }
}

impl std::fmt::Debug for AsecStager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsecStager")
            .field("asec_path", &self.asec_path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records bind mounts instead of touching the kernel.
    #[derive(Default)]
    struct RecordingOps {
        binds: Mutex<Vec<(PathBuf, PathBuf)>>,
        fail_bind: bool,
    }

    impl MountOps for RecordingOps {
        fn prepare_dir(&self, _: &Path, _: u32, _: u32, _: u32) -> VolResult<()> {
            Ok(())
        }
        fn bind_mount(&self, src: &Path, dst: &Path) -> VolResult<()> {
            if self.fail_bind {
                return Err(VolError::Io(std::io::Error::other("bind refused")));
            }
            self.binds.lock().push((src.to_path_buf(), dst.to_path_buf()));
            Ok(())
        }
        fn force_unmount(&self, _: &Path) -> VolResult<()> {
            Ok(())
        }
        fn remove_dir(&self, _: &Path) -> VolResult<()> {
            Ok(())
        }
        fn wipe_block_device(&self, _: &Path) -> VolResult<()> {
            Ok(())
        }
    }

    #[test]
    fn creates_and_binds_secure_dir() {
        let temp = tempfile::tempdir().unwrap();
        let ops = Arc::new(RecordingOps::default());
        let asec = temp.path().join("asec");
        let stager = AsecStager::new(ops.clone(), asec.clone());

        stager.stage(temp.path()).unwrap();

        let secure = temp.path().join(SECURE_DIR);
        assert!(secure.is_dir());
        assert_eq!(ops.binds.lock().as_slice(), &[(secure, asec)]);
    }

    #[test]
    fn migrates_legacy_dir() {
        let temp = tempfile::tempdir().unwrap();
        let legacy = temp.path().join(LEGACY_DIR);
        std::fs::create_dir(&legacy).unwrap();
        std::fs::write(legacy.join("container.img"), b"x").unwrap();

        let stager = AsecStager::new(
            Arc::new(RecordingOps::default()),
            temp.path().join("asec"),
        );
        stager.stage(temp.path()).unwrap();

        let secure = temp.path().join(SECURE_DIR);
        assert!(!legacy.exists());
        assert!(secure.join("container.img").exists());
    }

    #[test]
    fn existing_secure_dir_is_kept() {
        let temp = tempfile::tempdir().unwrap();
        let secure = temp.path().join(SECURE_DIR);
        std::fs::create_dir(&secure).unwrap();
        std::fs::write(secure.join("keep"), b"x").unwrap();

        let stager = AsecStager::new(
            Arc::new(RecordingOps::default()),
            temp.path().join("asec"),
        );
        stager.stage(temp.path()).unwrap();

        assert!(secure.join("keep").exists());
    }

    #[test]
    fn bind_failure_is_not_surfaced() {
        let temp = tempfile::tempdir().unwrap();
        let ops = Arc::new(RecordingOps {
            fail_bind: true,
            ..Default::default()
        });
        let stager = AsecStager::new(ops, temp.path().join("asec"));

        stager.stage(temp.path()).unwrap();
    }
}
