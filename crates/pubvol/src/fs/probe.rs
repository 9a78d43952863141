//! Untrusted metadata probe via `blkid`.

use std::path::{Path, PathBuf};
use std::process::Command;

use pubvol_common::{VolError, VolResult};

use super::{FsProbe, Prober};

/// [`Prober`] shelling out to `blkid` in export mode.
#[derive(Debug, Clone)]
pub struct BlkidProber {
    binary: PathBuf,
}

impl Default for BlkidProber {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("blkid"),
        }
    }
}

impl BlkidProber {
    /// Prober using an explicit `blkid` path.
    #[must_use]
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn parse(output: &str) -> FsProbe {
        let mut probe = FsProbe::default();
        for line in output.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.trim() {
                "TYPE" => probe.fstype = value.to_string(),
                "UUID" => probe.uuid = Some(value.to_string()),
                "LABEL" => probe.label = Some(value.to_string()),
                _ => {}
            }
        }
        probe
    }
}

impl Prober for BlkidProber {
    fn probe_untrusted(&self, device: &Path) -> VolResult<FsProbe> {
        tracing::debug!(device = %device.display(), "Probing filesystem metadata");

        // -c /dev/null bypasses the cache: the medium may have just changed.
        let output = Command::new(&self.binary)
            .args(["-c", "/dev/null", "-s", "TYPE", "-s", "UUID", "-s", "LABEL", "-o", "export"])
            .arg(device)
            .output()
            .map_err(VolError::Io)?;

        if !output.status.success() {
            return Err(VolError::Io(std::io::Error::other(format!(
                "blkid found no filesystem on {}: {}",
                device.display(),
                output.status
            ))));
        }

        let probe = Self::parse(&String::from_utf8_lossy(&output.stdout));
        tracing::debug!(
            device = %device.display(),
            fstype = %probe.fstype,
            uuid = probe.uuid.as_deref().unwrap_or(""),
            label = probe.label.as_deref().unwrap_or(""),
            "Probe complete"
        );
        Ok(probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_export_output() {
        let out = "DEVNAME=/dev/sdb1\nUUID=ABCD-1234\nTYPE=vfat\nLABEL=CAMERA\n";
        let probe = BlkidProber::parse(out);
        assert_eq!(probe.fstype, "vfat");
        assert_eq!(probe.uuid.as_deref(), Some("ABCD-1234"));
        assert_eq!(probe.label.as_deref(), Some("CAMERA"));
    }

    #[test]
    fn parse_tolerates_missing_fields() {
        let probe = BlkidProber::parse("TYPE=ntfs\n");
        assert_eq!(probe.fstype, "ntfs");
        assert!(probe.uuid.is_none());
        assert!(probe.label.is_none());
    }

    #[test]
    fn probe_surfaces_missing_tool() {
        let prober = BlkidProber::with_binary("/nonexistent/blkid");
        assert!(prober.probe_untrusted(Path::new("/dev/null")).is_err());
    }
}
