//! # flock-core
//!
//! Core types for the Flock swarm coordination system.
//!
//! A swarm is a goal-directed group of agents driven through a recurring
//! Observe → Orient → Decide → Act → Reflect cycle under a finite budget of
//! credits, tokens and time.
//!
//! This crate holds what every other Flock crate shares:
//! - Domain types (swarm records, execution contexts, decisions)
//! - The unified error type
//! - Process configuration
//! - Collaborator traits (store, event bus, strategy, team, monitor)
//! - The tier communication contract

pub mod collaborators;
pub mod config;
mod decision;
mod error;
pub mod fail_open;
pub mod tier;
mod types;

pub use collaborators::{
    topics, BusEvent, ConsensusOutcome, ConsensusScore, DecisionEngine, DecisionInput,
    EnvironmentSnapshot, EventBus, Monitor, Observation, Orientation, PerformanceMetrics,
    Proposal, ProposedDecision, Reflection, ReflectionInput, ResourceStatus,
    ResourceStatusProvider, SituationAnalysis, SituationInput, Subscription, SwarmStore,
    TeamMember, TeamRegistry,
};
pub use config::FlockConfig;
pub use decision::DecisionKind;
pub use error::{FlockError, Result};
pub use tier::{
    ExecutionOptions, ExecutionStatus, Priority, ResourcesUsed, RetryPolicy, TierCapabilities,
    TierError, TierExecutionRecord, TierExecutor, TierRequest, TierResult,
};
pub use types::*;
