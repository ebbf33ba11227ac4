//! Hot reload of capability bundles.
//!
//! A reload builds a complete new generation off to the side, then swaps the
//! registry pointer in one step. Calls already bound to the old generation
//! keep their callable until they finish.

pub mod snapshot;
pub mod supervisor;

pub use snapshot::BundleSnapshot;
pub use supervisor::{ReloadError, ReloadSettings, ReloadSupervisor};
