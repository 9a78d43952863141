//! # pubvol-common
//!
//! Shared types for the pubvol volume lifecycle:
//! - Volume identifiers derived from block device numbers
//! - The filesystem path schema for mount points and device nodes
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{VolError, VolResult};
pub use id::VolumeId;
pub use paths::VolPaths;
