//! nexus-artifact-rs keeps one local file in sync with an artifact published
//! in a Sonatype Nexus repository.
//!
//! Each run searches the registry at most once, avoids the network entirely
//! when recorded install metadata already answers the question, and installs
//! through a verified temp file and an atomic rename.

#![warn(clippy::all)]

pub mod checksum;
pub mod engine;
pub mod error;
pub mod install;
pub mod metadata;
pub mod registry;
pub mod resolver;
pub mod types;
pub mod version;

#[cfg(test)]
mod testutil;

pub use engine::{Ensure, SyncEngine, SyncOptions, SyncOutcome, SyncState};
pub use error::SyncError;
