//! # pubvol
//!
//! Lifecycle management for a single public (removable) storage volume
//! backed by a block device: device node creation, filesystem check and
//! mount, user-space passthrough daemon supervision, legacy
//! secure-container staging, and best-effort teardown.
//!
//! The central type is [`volume::PublicVolume`], a state machine driven by
//! an external volume registry:
//!
//! ```text
//! create() -> mount() -> unmount() -> destroy()
//!                \-> format() while unmounted
//! ```
//!
//! Kernel and process plumbing is reached through narrow collaborator
//! traits ([`device::DeviceNodeService`], [`mountops::MountOps`],
//! [`fs::FilesystemBackend`], [`fuse::FuseRunner`]) so the lifecycle can
//! be exercised without root privileges or real block devices.

pub mod advisory;
pub mod asec;
pub mod config;
pub mod device;
pub mod events;
pub mod fs;
pub mod fuse;
pub mod mountops;
pub mod volume;

pub use config::VolumeConfig;
pub use events::{EventBus, VolumeEvent};
pub use pubvol_common::{VolError, VolPaths, VolResult, VolumeId};
pub use volume::{Collaborators, MountFlags, PublicVolume, VolumeState};
