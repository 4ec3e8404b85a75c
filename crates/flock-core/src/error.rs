//! Unified error types for Flock

use thiserror::Error;

use crate::types::ResourceKind;

/// Unified error type for all Flock operations
#[derive(Error, Debug)]
pub enum FlockError {
    // Lookup errors
    #[error("Swarm not found: {0}")]
    SwarmNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    // Ledger errors
    #[error("Ledger account not found: {0}")]
    AccountNotFound(String),

    #[error("Ledger account already open: {0}")]
    AccountExists(String),

    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Budget exceeded for {kind}: requested {requested}, remaining {remaining}")]
    BudgetExceeded {
        kind: ResourceKind,
        requested: u64,
        remaining: u64,
    },

    // Lifecycle errors
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Invalid swarm configuration: {0}")]
    InvalidConfig(String),

    // Collaborator errors
    #[error("Swarm store error: {0}")]
    Store(String),

    #[error("Decision failed: {0}")]
    DecisionFailed(String),

    #[error("[{code}] {message} (tier: {tier})")]
    Delegation {
        code: String,
        message: String,
        tier: String,
    },

    #[error("Team error: {0}")]
    Team(String),

    #[error("Decision engine error: {0}")]
    Engine(String),

    #[error("Monitor error: {0}")]
    Monitor(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl FlockError {
    /// Whether this error means the referenced swarm or execution does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::SwarmNotFound(_)
                | Self::ExecutionNotFound(_)
                | Self::AccountNotFound(_)
                | Self::ReservationNotFound(_)
        )
    }
}

/// Result type alias using FlockError
pub type Result<T> = std::result::Result<T, FlockError>;
