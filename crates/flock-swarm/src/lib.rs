//! # flock-swarm
//!
//! Swarm lifecycle and OODA execution for Flock.
//!
//! The [`SwarmManager`] owns every live swarm: it persists lifecycle state,
//! opens a ledger account per swarm and schedules one OODA loop per active
//! swarm. The [`OodaDriver`] runs a single Observe → Orient → Decide → Act →
//! Reflect tick. [`SwarmTier`] exposes the whole subsystem through the tier
//! contract.

mod engine;
mod event_bus;
mod lifecycle;
mod ooda;
mod scheduler;
mod services;
mod state_machine;
mod store;
mod tier;

pub use engine::BudgetedEngine;
pub use event_bus::InMemoryEventBus;
pub use lifecycle::{CreateSwarmParams, SwarmManager, SwarmSummary, FORCED_TERMINATION};
pub use ooda::{OodaDriver, Phase, TickReport, POOL_ALLOCATION};
pub use scheduler::{TickControl, TickHandler, TickScheduler};
pub use services::Services;
pub use state_machine::{transition, LifecycleAction, LifecycleEvent};
pub use store::InMemorySwarmStore;
pub use tier::SwarmTier;
