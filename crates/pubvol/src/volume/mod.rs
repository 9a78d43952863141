//! Volume lifecycle core.
//!
//! This module provides the [`PublicVolume`] state machine and its
//! supporting types.

mod flags;
mod public;
mod state;
mod teardown;

pub use flags::MountFlags;
pub use public::{Collaborators, PublicVolume};
pub use state::VolumeState;
pub use teardown::Teardown;
