#![allow(unsafe_code)]
//! Passthrough (FUSE) daemon supervision.
//!
//! Each mounted, visible volume runs exactly one passthrough daemon
//! process. The supervisor forks and execs it, detects readiness by
//! watching the write-view path move onto the daemon's filesystem, and
//! guarantees the process is reaped on teardown through an owned
//! session guard.

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pubvol_common::{VolError, VolResult};

use crate::config::VolumeConfig;
use crate::device::DeviceNodeService;

/// What to start a daemon for.
#[derive(Debug)]
pub struct FuseRequest<'a> {
    /// Raw mount path the daemon serves from.
    pub raw_path: &'a Path,
    /// Stable name, the daemon's mount label.
    pub stable_name: &'a str,
    /// Write-scoped view path whose backing device signals readiness.
    pub write_view: &'a Path,
    /// Run in write-capable (primary external storage) mode.
    pub primary: bool,
    /// User the mount was requested for.
    pub user_id: u32,
}

/// A running daemon owned by its volume.
///
/// Stopping (or dropping) a session reaps the process; a live session
/// always refers to a live pid.
pub trait FuseSession: Send {
    /// Process id of the supervised daemon.
    fn pid(&self) -> i32;

    /// Terminate the daemon and block until it is reaped.
    fn stop(self: Box<Self>) -> VolResult<()>;
}

/// Starts passthrough daemons.
pub trait FuseRunner: Send + Sync {
    /// Spin up a daemon and wait for it to present its view.
    fn start(&self, request: &FuseRequest<'_>) -> VolResult<Box<dyn FuseSession>>;
}

/// The real fork/exec supervisor.
pub struct FuseSupervisor {
    binary: PathBuf,
    media_uid: u32,
    media_gid: u32,
    poll: Duration,
    deadline: Duration,
    devices: Arc<dyn DeviceNodeService>,
}

impl FuseSupervisor {
    /// Supervisor configured from `config`, probing readiness via `devices`.
    #[must_use]
    pub fn new(config: &VolumeConfig, devices: Arc<dyn DeviceNodeService>) -> Self {
        Self {
            binary: config.fuse_binary.clone(),
            media_uid: config.media_uid,
            media_gid: config.media_gid,
            poll: config.spinup_poll,
            deadline: config.spinup_deadline,
            devices,
        }
    }

    fn argv(&self, request: &FuseRequest<'_>) -> VolResult<Vec<CString>> {
        use std::os::unix::ffi::OsStrExt;

        let mut argv: Vec<Vec<u8>> = vec![
            self.binary.as_os_str().as_bytes().to_vec(),
            b"-u".to_vec(),
            self.media_uid.to_string().into_bytes(),
            b"-g".to_vec(),
            self.media_gid.to_string().into_bytes(),
            b"-U".to_vec(),
            request.user_id.to_string().into_bytes(),
        ];
        if request.primary {
            argv.push(b"-w".to_vec());
        }
        argv.push(request.raw_path.as_os_str().as_bytes().to_vec());
        argv.push(request.stable_name.as_bytes().to_vec());

        argv.into_iter()
            .map(|arg| {
                CString::new(arg).map_err(|_| VolError::InvalidArgument {
                    message: "daemon argument contains NUL".to_string(),
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for FuseSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FuseSupervisor")
            .field("binary", &self.binary)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl FuseRunner for FuseSupervisor {
    fn start(&self, request: &FuseRequest<'_>) -> VolResult<Box<dyn FuseSession>> {
        let before = self.devices.device_id_of(request.write_view)?;
        let argv = self.argv(request)?;

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            return Err(VolError::Io(std::io::Error::last_os_error()));
        }

        if pid == 0 {
            // Child: exec never unwinds into the parent's control flow.
            let arg_ptrs: Vec<*const libc::c_char> = argv
                .iter()
                .map(|a| a.as_ptr())
                .chain(std::iter::once(std::ptr::null()))
                .collect();
            unsafe {
                libc::execv(arg_ptrs[0], arg_ptrs.as_ptr());
            }
            eprintln!(
                "passthrough daemon exec failed: {}",
                std::io::Error::last_os_error()
            );
            unsafe { libc::_exit(1) };
        }

        tracing::info!(
            pid,
            raw = %request.raw_path.display(),
            primary = request.primary,
            "Passthrough daemon forked"
        );

        let expires = Instant::now() + self.deadline;
        loop {
            // A child that died before serving is an immediate failure.
            let mut status: libc::c_int = 0;
            if unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) } == pid {
                return Err(VolError::Io(std::io::Error::other(
                    "passthrough daemon exited during spin-up",
                )));
            }

            match self.devices.device_id_of(request.write_view) {
                Ok(now) if now != before => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Readiness probe failed, retrying");
                }
            }

            if Instant::now() >= expires {
                let deadline_ms = u64::try_from(self.deadline.as_millis()).unwrap_or(u64::MAX);
                tracing::error!(pid, deadline_ms, "Daemon spin-up deadline expired, killing");
                if let Err(e) = reap(pid, libc::SIGKILL) {
                    tracing::error!(pid, error = %e, "Failed to reap timed-out daemon");
                }
                return Err(VolError::DaemonTimeout { deadline_ms });
            }

            std::thread::sleep(self.poll);
        }

        tracing::info!(pid, "Passthrough daemon is serving");
        Ok(Box::new(DaemonProcess { pid, reaped: false }))
    }
}

/// Owned handle to a supervised daemon process.
pub struct DaemonProcess {
    pid: libc::pid_t,
    reaped: bool,
}

impl FuseSession for DaemonProcess {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn stop(mut self: Box<Self>) -> VolResult<()> {
        tracing::debug!(pid = self.pid, "Stopping passthrough daemon");
        reap(self.pid, libc::SIGTERM).map_err(VolError::Io)?;
        self.reaped = true;
        Ok(())
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        tracing::warn!(pid = self.pid, "Daemon session dropped without stop(), reaping");
        if let Err(e) = reap(self.pid, libc::SIGTERM) {
            tracing::error!(pid = self.pid, error = %e, "Failed to reap daemon");
        }
    }
}

/// Signal `pid` and block until it is reaped, retrying interrupted waits.
fn reap(pid: libc::pid_t, signal: libc::c_int) -> std::io::Result<()> {
    if unsafe { libc::kill(pid, signal) } != 0 {
        let err = std::io::Error::last_os_error();
        // Already gone is what we wanted; waitpid below still reaps a zombie.
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err);
        }
    }

    loop {
        let mut status: libc::c_int = 0;
        if unsafe { libc::waitpid(pid, &mut status, 0) } == -1 {
            let err = std::io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ECHILD) => return Ok(()),
                _ => return Err(err),
            }
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Device service whose reported id advances on every query, so the
    /// first readiness probe after the baseline already looks "mounted".
    struct TickingDevices(AtomicU64);

    impl DeviceNodeService for TickingDevices {
        fn create(&self, _: &Path, _: u32, _: u32) -> VolResult<()> {
            Ok(())
        }
        fn destroy(&self, _: &Path) -> VolResult<()> {
            Ok(())
        }
        fn device_id_of(&self, _: &Path) -> VolResult<u64> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    /// Device id never changes: spin-up can only end by exit or deadline.
    struct FrozenDevices;

    impl DeviceNodeService for FrozenDevices {
        fn create(&self, _: &Path, _: u32, _: u32) -> VolResult<()> {
            Ok(())
        }
        fn destroy(&self, _: &Path) -> VolResult<()> {
            Ok(())
        }
        fn device_id_of(&self, _: &Path) -> VolResult<u64> {
            Ok(7)
        }
    }

    fn request<'a>(raw: &'a Path, write: &'a Path) -> FuseRequest<'a> {
        FuseRequest {
            raw_path: raw,
            stable_name: "ABCD-1234",
            write_view: write,
            primary: true,
            user_id: 0,
        }
    }

    #[test]
    fn argv_layout() {
        let config = VolumeConfig::default();
        let supervisor = FuseSupervisor::new(&config, Arc::new(FrozenDevices));
        let raw = PathBuf::from("/mnt/media_rw/ABCD-1234");
        let write = PathBuf::from("/mnt/runtime/write/ABCD-1234");

        let argv = supervisor.argv(&request(&raw, &write)).unwrap();
        let args: Vec<&str> = argv.iter().map(|c| c.to_str().unwrap()).collect();
        assert_eq!(
            args,
            [
                "/system/bin/sdcard",
                "-u",
                "1023",
                "-g",
                "1023",
                "-U",
                "0",
                "-w",
                "/mnt/media_rw/ABCD-1234",
                "ABCD-1234"
            ]
        );
    }

    #[test]
    fn argv_secondary_has_no_write_flag() {
        let config = VolumeConfig::default();
        let supervisor = FuseSupervisor::new(&config, Arc::new(FrozenDevices));
        let raw = PathBuf::from("/mnt/media_rw/vol");
        let write = PathBuf::from("/mnt/runtime/write/vol");
        let mut req = request(&raw, &write);
        req.primary = false;

        let argv = supervisor.argv(&req).unwrap();
        assert!(!argv.iter().any(|c| c.to_bytes() == b"-w"));
    }

    /// Executable that ignores the daemon argv and just stays alive.
    fn fake_daemon(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-daemon.sh");
        std::fs::write(&path, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn start_succeeds_once_view_moves() {
        let temp = tempfile::tempdir().unwrap();
        let config = VolumeConfig::default().with_fuse_binary(fake_daemon(temp.path()));
        let supervisor = FuseSupervisor::new(&config, Arc::new(TickingDevices(AtomicU64::new(1))));
        let raw = PathBuf::from("/tmp");
        let write = PathBuf::from("/tmp");

        let session = supervisor.start(&request(&raw, &write)).unwrap();
        let pid = session.pid();
        assert!(pid > 0);

        session.stop().unwrap();
        // Reaped: the pid is no longer a live process.
        assert_eq!(unsafe { libc::kill(pid, 0) }, -1);
        assert_eq!(
            std::io::Error::last_os_error().raw_os_error(),
            Some(libc::ESRCH)
        );
    }

    #[test]
    fn start_fails_when_daemon_exits_before_serving() {
        // /bin/false exits immediately and the view never moves.
        let config = VolumeConfig::default()
            .with_fuse_binary("/bin/false")
            .with_spinup_deadline(Duration::from_secs(5));
        let supervisor = FuseSupervisor::new(&config, Arc::new(FrozenDevices));
        let raw = PathBuf::from("/tmp");
        let write = PathBuf::from("/tmp");

        assert!(supervisor.start(&request(&raw, &write)).is_err());
    }

    #[test]
    fn spinup_deadline_expires() {
        // A daemon that stays alive but never mounts its view.
        let temp = tempfile::tempdir().unwrap();
        let config = VolumeConfig::default()
            .with_fuse_binary(fake_daemon(temp.path()))
            .with_spinup_deadline(Duration::from_millis(200));
        let supervisor = FuseSupervisor::new(&config, Arc::new(FrozenDevices));
        let raw = PathBuf::from("/tmp");
        let write = PathBuf::from("/tmp");

        match supervisor.start(&request(&raw, &write)) {
            Ok(session) => panic!("daemon pid {} should not have come up", session.pid()),
            Err(err) => assert!(matches!(err, VolError::DaemonTimeout { .. })),
        }
    }
}
