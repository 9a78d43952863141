//! Mount flags.

/// Flags supplied at mount time; they never change mid-mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MountFlags {
    /// Volume is user/application-facing and needs the passthrough daemon.
    pub visible: bool,
    /// Volume is the device's designated primary external storage.
    pub primary: bool,
}

impl MountFlags {
    /// Flags for an internal-only mount.
    #[must_use]
    pub const fn internal() -> Self {
        Self {
            visible: false,
            primary: false,
        }
    }

    /// Flags for a visible secondary volume.
    #[must_use]
    pub const fn visible() -> Self {
        Self {
            visible: true,
            primary: false,
        }
    }

    /// Flags for the primary external storage volume.
    #[must_use]
    pub const fn primary() -> Self {
        Self {
            visible: true,
            primary: true,
        }
    }
}
