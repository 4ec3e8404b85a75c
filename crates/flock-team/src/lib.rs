//! # flock-team
//!
//! Team membership and consensus for Flock swarms.
//!
//! This crate provides:
//! - Threshold consensus over member votes
//! - An in-process team registry implementing `TeamRegistry`

mod consensus;
mod registry;

pub use consensus::{ConsensusConfig, Stance, Tally, Vote};
pub use registry::InMemoryTeamRegistry;
