//! Volume identifiers derived from block device numbers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{VolError, VolResult};

/// A stable volume identifier of the form `public:<major>:<minor>`.
///
/// The id is derived from the backing block device's major:minor pair and
/// is immutable for the lifetime of the volume object. It doubles as the
/// fallback stable name when the filesystem carries no UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeId {
    major: u32,
    minor: u32,
}

impl VolumeId {
    /// Create an id from a device major:minor pair.
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Major number of the backing device.
    #[must_use]
    pub const fn major(&self) -> u32 {
        self.major
    }

    /// Minor number of the backing device.
    #[must_use]
    pub const fn minor(&self) -> u32 {
        self.minor
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "public:{}:{}", self.major, self.minor)
    }
}

impl FromStr for VolumeId {
    type Err = VolError;

    fn from_str(s: &str) -> VolResult<Self> {
        let invalid = || VolError::InvalidArgument {
            message: format!("malformed volume id: {s:?}"),
        };

        let rest = s.strip_prefix("public:").ok_or_else(invalid)?;
        let (major, minor) = rest.split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}
