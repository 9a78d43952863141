//! Common error types for the pubvol crates.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`VolError`].
pub type VolResult<T> = Result<T, VolError>;

/// Errors produced by volume lifecycle operations.
#[derive(Error, Diagnostic, Debug)]
pub enum VolError {
    /// I/O or device error. Carries the underlying OS error code.
    #[error("I/O error: {0}")]
    #[diagnostic(code(pubvol::io))]
    Io(#[from] std::io::Error),

    /// Detected or requested filesystem type is not in the supported set.
    #[error("Unsupported filesystem: {fstype:?}")]
    #[diagnostic(
        code(pubvol::fs::unsupported),
        help("Only vfat and ntfs volumes can be mounted")
    )]
    UnsupportedFilesystem {
        /// The offending filesystem type string.
        fstype: String,
    },

    /// Caller passed an argument outside the accepted set.
    #[error("Invalid argument: {message}")]
    #[diagnostic(code(pubvol::invalid_argument))]
    InvalidArgument {
        /// Description of the rejected argument.
        message: String,
    },

    /// Lifecycle operation invoked from the wrong state.
    #[error("Cannot {operation} while volume is {state}")]
    #[diagnostic(code(pubvol::invalid_state))]
    InvalidState {
        /// The operation that was attempted.
        operation: String,
        /// The state the volume was in.
        state: String,
    },

    /// The passthrough daemon never presented its view before the deadline.
    #[error("Passthrough daemon did not come up within {deadline_ms} ms")]
    #[diagnostic(
        code(pubvol::fuse::timeout),
        help("The daemon was killed and reaped; the raw mount is still active")
    )]
    DaemonTimeout {
        /// The spin-up deadline that expired, in milliseconds.
        deadline_ms: u64,
    },
}

impl VolError {
    /// Build an [`VolError::InvalidState`] for `operation` in `state`.
    pub fn invalid_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.to_string(),
        }
    }

    /// The raw OS error code, when this error wraps one.
    #[must_use]
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Self::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = VolError::UnsupportedFilesystem {
            fstype: "exfat".to_string(),
        };
        assert_eq!(err.to_string(), "Unsupported filesystem: \"exfat\"");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "no such device");
        let err: VolError = io_err.into();
        assert!(matches!(err, VolError::Io(_)));
    }

    #[test]
    fn os_error_passthrough() {
        let err: VolError = std::io::Error::from_raw_os_error(libc_eio()).into();
        assert_eq!(err.os_error(), Some(libc_eio()));

        let err = VolError::InvalidArgument {
            message: "bad".into(),
        };
        assert_eq!(err.os_error(), None);
    }

    const fn libc_eio() -> i32 {
        5
    }
}
