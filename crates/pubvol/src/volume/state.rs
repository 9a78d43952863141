//! Volume lifecycle states.

/// Lifecycle state of a public volume.
///
/// `Created` and `Unmounted` are equivalent resting states: the device
/// node exists and nothing is mounted. `Mounted` is the only state with
/// an active daemon or bind mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    /// Object exists, no device node yet.
    New,
    /// Device node exists, filesystem not probed or mounted.
    Created,
    /// Filesystem mounted, paths populated, daemon running if visible.
    Mounted,
    /// Paths cleared, device node still exists.
    Unmounted,
    /// Device node removed; terminal.
    Destroyed,
}

impl VolumeState {
    /// Whether `create()` may run.
    #[must_use]
    pub const fn can_create(self) -> bool {
        matches!(self, Self::New)
    }

    /// Whether `mount()` may run.
    #[must_use]
    pub const fn can_mount(self) -> bool {
        matches!(self, Self::Created | Self::Unmounted)
    }

    /// Whether `unmount()` may run.
    #[must_use]
    pub const fn can_unmount(self) -> bool {
        !matches!(self, Self::New | Self::Destroyed)
    }

    /// Whether `destroy()` may run.
    #[must_use]
    pub const fn can_destroy(self) -> bool {
        matches!(self, Self::Created | Self::Unmounted)
    }

    /// Whether `format()` may run (only while not mounted).
    #[must_use]
    pub const fn can_format(self) -> bool {
        matches!(self, Self::Created | Self::Unmounted)
    }
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Created => write!(f, "created"),
            Self::Mounted => write!(f, "mounted"),
            Self::Unmounted => write!(f, "unmounted"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}
