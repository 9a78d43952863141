//! The public volume state machine.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pubvol_common::{VolError, VolResult, VolumeId};

use crate::advisory::{self, AdvisoryStore, MemoryStore};
use crate::asec::AsecStager;
use crate::config::VolumeConfig;
use crate::device::{DevNodes, DeviceNodeService};
use crate::events::{EventBus, VolumeEvent};
use crate::fs::{self, BlkidProber, FormatOptions, FsDispatch, MountParams, Prober};
use crate::fuse::{FuseRequest, FuseRunner, FuseSession, FuseSupervisor};
use crate::mountops::{MountOps, SysMountOps};

use super::flags::MountFlags;
use super::state::VolumeState;
use super::teardown::Teardown;

/// Collaborator wiring for a volume.
///
/// Production code uses [`Collaborators::system`]; tests inject fakes.
pub struct Collaborators {
    /// Device node lifecycle service.
    pub devices: Arc<dyn DeviceNodeService>,
    /// Bind/unmount and directory plumbing.
    pub mount_ops: Arc<dyn MountOps>,
    /// Filesystem backend dispatch.
    pub dispatch: FsDispatch,
    /// Untrusted metadata prober.
    pub prober: Box<dyn Prober>,
    /// Passthrough daemon runner.
    pub fuse: Box<dyn FuseRunner>,
    /// Advisory trigger flag store.
    pub advisory: Arc<dyn AdvisoryStore>,
    /// Metadata change notification bus.
    pub events: EventBus,
}

impl Collaborators {
    /// Wiring against the real kernel and platform tools.
    #[must_use]
    pub fn system(config: &VolumeConfig) -> Self {
        let devices: Arc<dyn DeviceNodeService> = Arc::new(DevNodes);
        Self {
            fuse: Box::new(FuseSupervisor::new(config, devices.clone())),
            devices,
            mount_ops: Arc::new(SysMountOps),
            dispatch: FsDispatch::system(),
            prober: Box::new(BlkidProber::default()),
            advisory: Arc::new(MemoryStore::default()),
            events: EventBus::new(),
        }
    }
}

/// The five derived runtime paths, rebuilt on each mount and cleared on
/// unmount. Either all are populated or none are.
#[derive(Debug, Clone)]
struct MountPoints {
    raw: PathBuf,
    fuse_default: PathBuf,
    fuse_read: PathBuf,
    fuse_write: PathBuf,
    visible: PathBuf,
}

/// A public storage volume backed by one block device.
///
/// Lifecycle operations run on a single control thread; the owning
/// registry serializes them. The volume references the backing device by
/// major:minor but does not own it.
pub struct PublicVolume {
    id: VolumeId,
    config: VolumeConfig,
    devices: Arc<dyn DeviceNodeService>,
    mount_ops: Arc<dyn MountOps>,
    dispatch: FsDispatch,
    prober: Box<dyn Prober>,
    fuse: Box<dyn FuseRunner>,
    advisory: Arc<dyn AdvisoryStore>,
    events: EventBus,
    asec: AsecStager,
    dev_path: PathBuf,
    state: VolumeState,
    fs_type: Option<String>,
    fs_uuid: Option<String>,
    fs_label: Option<String>,
    mounts: Option<MountPoints>,
    session: Option<Box<dyn FuseSession>>,
}

impl PublicVolume {
    /// Volume for the block device `major:minor`, wired to the real system.
    #[must_use]
    pub fn new(major: u32, minor: u32, config: VolumeConfig) -> Self {
        let collaborators = Collaborators::system(&config);
        Self::with_collaborators(major, minor, config, collaborators)
    }

    /// Volume with explicit collaborator wiring.
    #[must_use]
    pub fn with_collaborators(
        major: u32,
        minor: u32,
        config: VolumeConfig,
        collaborators: Collaborators,
    ) -> Self {
        let id = VolumeId::new(major, minor);
        let dev_path = config.paths.device_node(&id);
        let asec = AsecStager::new(collaborators.mount_ops.clone(), config.paths.asec());
        Self {
            id,
            config,
            devices: collaborators.devices,
            mount_ops: collaborators.mount_ops,
            dispatch: collaborators.dispatch,
            prober: collaborators.prober,
            fuse: collaborators.fuse,
            advisory: collaborators.advisory,
            events: collaborators.events,
            asec,
            dev_path,
            state: VolumeState::New,
            fs_type: None,
            fs_uuid: None,
            fs_label: None,
            mounts: None,
            session: None,
        }
    }

    /// Allocate the device node. On failure the volume stays pre-created.
    pub fn create(&mut self) -> VolResult<()> {
        if !self.state.can_create() {
            return Err(VolError::invalid_state("create", self.state));
        }

        self.devices
            .create(&self.dev_path, self.id.major(), self.id.minor())?;
        self.state = VolumeState::Created;

        tracing::info!(id = %self.id, node = %self.dev_path.display(), "Volume created");
        Ok(())
    }

    /// Probe type/UUID/label from the raw device without mounting it.
    ///
    /// On success the metadata fields are updated and one change event per
    /// field is published.
    pub fn read_metadata(&mut self) -> VolResult<()> {
        let probe = self.prober.probe_untrusted(&self.dev_path)?;

        self.fs_type = Some(probe.fstype.clone());
        self.fs_uuid = probe.uuid.clone();
        self.fs_label = probe.label.clone();

        let id = self.id.to_string();
        self.events.publish(VolumeEvent::FsTypeChanged {
            id: id.clone(),
            fstype: probe.fstype,
        });
        self.events.publish(VolumeEvent::FsUuidChanged {
            id: id.clone(),
            uuid: probe.uuid.unwrap_or_default(),
        });
        self.events.publish(VolumeEvent::FsLabelChanged {
            id,
            label: probe.label.unwrap_or_default(),
        });

        Ok(())
    }

    /// Mount the volume.
    ///
    /// Probes metadata, checks and mounts the filesystem, stages the
    /// legacy secure-container root on primary volumes, and spins up the
    /// passthrough daemon on visible ones. After a daemon failure the
    /// filesystem stays mounted; the caller recovers via [`Self::unmount`].
    pub fn mount(&mut self, flags: MountFlags, user_id: u32) -> VolResult<()> {
        if !self.state.can_mount() {
            return Err(VolError::invalid_state("mount", self.state));
        }

        if let Err(e) = self.read_metadata() {
            tracing::warn!(id = %self.id, error = %e, "Metadata probe failed");
        }

        let fs_type = self.fs_type.clone().unwrap_or_default();
        if !fs::is_supported(&fs_type) {
            tracing::error!(id = %self.id, fstype = %fs_type, "Unsupported filesystem");
            return Err(VolError::UnsupportedFilesystem { fstype: fs_type });
        }

        // vfat check first, NTFS as the fallback; the probed type does not
        // pick the backend, it only gated the allow-list above.
        let backend = self.dispatch.select(&self.dev_path)?;

        let stable_name = self.stable_name();
        let paths = &self.config.paths;
        let mounts = MountPoints {
            raw: paths.raw(&stable_name),
            fuse_default: paths.fuse_default(&stable_name),
            fuse_read: paths.fuse_read(&stable_name),
            fuse_write: paths.fuse_write(&stable_name),
            visible: if flags.visible {
                paths.storage(&stable_name)
            } else {
                paths.raw(&stable_name)
            },
        };

        let raw = mounts.raw.clone();
        let fuse_write = mounts.fuse_write.clone();
        let dirs = [
            mounts.raw.clone(),
            mounts.fuse_default.clone(),
            mounts.fuse_read.clone(),
            mounts.fuse_write.clone(),
        ];

        // Record the path set before touching the filesystem: any failure
        // from here on leaves directories or kernel state behind, and
        // unmount() reclaims whatever the recorded paths name.
        self.mounts = Some(mounts);

        for dir in &dirs {
            // Root-owned 0700: only the daemon views re-export the content.
            self.mount_ops.prepare_dir(dir, 0o700, 0, 0)?;
        }

        let params = MountParams::media(self.config.media_uid, self.config.media_gid);
        if let Err(e) = backend.mount(&self.dev_path, &raw, &params) {
            tracing::error!(
                id = %self.id,
                device = %self.dev_path.display(),
                fstype = backend.fstype(),
                error = %e,
                "Failed to mount"
            );
            return Err(e);
        }

        advisory::scan_triggers(self.advisory.as_ref(), &raw, &stable_name);

        if flags.primary {
            if let Err(e) = self.asec.stage(&raw) {
                tracing::warn!(id = %self.id, error = %e, "ASEC staging failed");
            }
        }

        if !flags.visible {
            // Not visible to apps, so no need to spin up the daemon
            self.state = VolumeState::Mounted;
            tracing::info!(id = %self.id, raw = %raw.display(), "Volume mounted (internal)");
            return Ok(());
        }

        debug_assert!(self.session.is_none(), "daemon already recorded");
        let request = FuseRequest {
            raw_path: &raw,
            stable_name: &stable_name,
            write_view: &fuse_write,
            primary: flags.primary,
            user_id,
        };
        let session = self.fuse.start(&request)?;

        tracing::info!(
            id = %self.id,
            raw = %raw.display(),
            pid = session.pid(),
            "Volume mounted"
        );
        self.session = Some(session);
        self.state = VolumeState::Mounted;
        Ok(())
    }

    /// Tear the mount down, best effort.
    ///
    /// Every step is attempted regardless of earlier failures; the volume
    /// always reaches `Unmounted` and the call succeeds once everything
    /// has been tried.
    pub fn unmount(&mut self) -> VolResult<()> {
        if !self.state.can_unmount() {
            return Err(VolError::invalid_state("unmount", self.state));
        }

        let mut teardown = Teardown::new();

        if let Some(session) = self.session.take() {
            let pid = session.pid();
            tracing::debug!(id = %self.id, pid, "Reaping passthrough daemon");
            teardown.run("stop passthrough daemon", move || session.stop());
        }

        let asec_path = self.config.paths.asec();
        let ops = self.mount_ops.clone();
        teardown.run("unmount asec stage", || ops.force_unmount(&asec_path));

        if let Some(mounts) = self.mounts.take() {
            teardown.run("unmount default view", || {
                ops.force_unmount(&mounts.fuse_default)
            });
            teardown.run("unmount read view", || ops.force_unmount(&mounts.fuse_read));
            teardown.run("unmount write view", || {
                ops.force_unmount(&mounts.fuse_write)
            });
            teardown.run("unmount raw", || ops.force_unmount(&mounts.raw));

            teardown.run("remove default view dir", || {
                ops.remove_dir(&mounts.fuse_default)
            });
            teardown.run("remove read view dir", || ops.remove_dir(&mounts.fuse_read));
            teardown.run("remove write view dir", || {
                ops.remove_dir(&mounts.fuse_write)
            });
            teardown.run("remove raw dir", || ops.remove_dir(&mounts.raw));
        }

        advisory::clear_triggers(self.advisory.as_ref(), &self.stable_name());

        self.state = VolumeState::Unmounted;
        if teardown.is_clean() {
            tracing::info!(id = %self.id, "Volume unmounted");
        } else {
            let failed: Vec<&str> = teardown.failures().map(|s| s.name).collect();
            tracing::warn!(id = %self.id, ?failed, "Volume unmounted with failed steps");
        }
        Ok(())
    }

    /// Remove the device node. Valid only from a resting state.
    pub fn destroy(&mut self) -> VolResult<()> {
        if !self.state.can_destroy() {
            return Err(VolError::invalid_state("destroy", self.state));
        }

        self.devices.destroy(&self.dev_path)?;
        self.state = VolumeState::Destroyed;

        tracing::info!(id = %self.id, "Volume destroyed");
        Ok(())
    }

    /// Format the device as vfat. `"auto"` is accepted as an alias.
    ///
    /// The preceding block wipe is best effort; the format itself is not.
    /// No state transition occurs.
    pub fn format(&self, fs_type: &str) -> VolResult<()> {
        if !self.state.can_format() {
            return Err(VolError::invalid_state("format", self.state));
        }

        if fs_type != "vfat" && fs_type != "auto" {
            tracing::error!(id = %self.id, fstype = fs_type, "Unsupported format type");
            return Err(VolError::InvalidArgument {
                message: format!("cannot format as {fs_type:?}, only vfat is supported"),
            });
        }

        if let Err(e) = self.mount_ops.wipe_block_device(&self.dev_path) {
            tracing::warn!(id = %self.id, error = %e, "Failed to wipe");
        }

        self.dispatch
            .vfat()
            .format(&self.dev_path, &FormatOptions::default())?;

        tracing::info!(id = %self.id, "Volume formatted");
        Ok(())
    }

    /// The stable name: filesystem UUID if present, else the volume id.
    #[must_use]
    pub fn stable_name(&self) -> String {
        self.fs_uuid
            .as_deref()
            .filter(|uuid| !uuid.is_empty())
            .map_or_else(|| self.id.to_string(), ToString::to_string)
    }

    /// Volume identifier.
    #[must_use]
    pub fn id(&self) -> &VolumeId {
        &self.id
    }

    /// Lifecycle state.
    #[must_use]
    pub fn state(&self) -> VolumeState {
        self.state
    }

    /// Path of the device special file.
    #[must_use]
    pub fn device_node_path(&self) -> &Path {
        &self.dev_path
    }

    /// Externally visible path, populated while mounted.
    #[must_use]
    pub fn public_path(&self) -> Option<&Path> {
        self.mounts.as_ref().map(|m| m.visible.as_path())
    }

    /// Internal (raw) path, populated while mounted.
    #[must_use]
    pub fn internal_path(&self) -> Option<&Path> {
        self.mounts.as_ref().map(|m| m.raw.as_path())
    }

    /// Detected filesystem type.
    #[must_use]
    pub fn fs_type(&self) -> Option<&str> {
        self.fs_type.as_deref()
    }

    /// Detected filesystem UUID.
    #[must_use]
    pub fn fs_uuid(&self) -> Option<&str> {
        self.fs_uuid.as_deref()
    }

    /// Detected filesystem label.
    #[must_use]
    pub fn fs_label(&self) -> Option<&str> {
        self.fs_label.as_deref()
    }

    /// Pid of the supervised daemon, if one is running.
    #[must_use]
    pub fn daemon_pid(&self) -> Option<i32> {
        self.session.as_ref().map(|s| s.pid())
    }
}

impl std::fmt::Debug for PublicVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicVolume")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("fs_type", &self.fs_type)
            .field("mounted", &self.mounts.is_some())
            .field("daemon_pid", &self.daemon_pid())
            .finish_non_exhaustive()
    }
}
