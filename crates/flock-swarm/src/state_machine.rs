//! Pure state machine for the swarm lifecycle
//!
//! `transition(state, event) -> (state, actions)` has no I/O. The lifecycle
//! manager persists the new state and then performs the returned actions in
//! order.
//!
//! ```text
//! Forming -> Planning -> Executing <-> Suspended -> Completed
//!                 \______________________________/
//! Terminated is reachable from every non-terminal state.
//! ```

use flock_core::{topics, FlockError, Result, SuspendReason, SwarmState};

/// Events that drive the swarm lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Lifecycle started after creation
    Start,
    /// First OODA tick fired
    BeginExecution,
    Pause { reason: SuspendReason },
    Resume,
    /// Goal reached or explicit stop
    Complete,
    /// Forced termination
    Terminate { reason: String },
}

impl std::fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::BeginExecution => write!(f, "begin_execution"),
            Self::Pause { .. } => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Complete => write!(f, "complete"),
            Self::Terminate { .. } => write!(f, "terminate"),
        }
    }
}

/// Side effects of a transition, in the order they must run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    /// (Re)schedule the swarm's OODA loop
    ScheduleLoop,
    /// Cancel the swarm's OODA loop
    CancelLoop,
    /// Drop the live execution context and close the ledger account
    ReleaseContext,
    /// Publish a lifecycle event
    Publish { topic: &'static str },
}

/// Pure lifecycle transition
///
/// Terminal states reject every event, as does any event the current state
/// has no edge for. The state is never changed on rejection.
pub fn transition(
    state: &SwarmState,
    event: LifecycleEvent,
) -> Result<(SwarmState, Vec<LifecycleAction>)> {
    use LifecycleAction::*;

    let next = match (state, &event) {
        (SwarmState::Forming, LifecycleEvent::Start) => (
            SwarmState::Planning,
            vec![
                ScheduleLoop,
                Publish {
                    topic: topics::SWARM_STARTED,
                },
            ],
        ),

        (SwarmState::Planning, LifecycleEvent::BeginExecution) => (SwarmState::Executing, vec![]),

        (SwarmState::Planning | SwarmState::Executing, LifecycleEvent::Pause { reason }) => (
            SwarmState::Suspended { reason: *reason },
            vec![
                CancelLoop,
                Publish {
                    topic: topics::SWARM_PAUSED,
                },
            ],
        ),

        (SwarmState::Suspended { .. }, LifecycleEvent::Resume) => (
            SwarmState::Executing,
            vec![
                ScheduleLoop,
                Publish {
                    topic: topics::SWARM_RESUMED,
                },
            ],
        ),

        (
            SwarmState::Planning | SwarmState::Executing | SwarmState::Suspended { .. },
            LifecycleEvent::Complete,
        ) => (
            SwarmState::Completed,
            vec![
                CancelLoop,
                ReleaseContext,
                Publish {
                    topic: topics::SWARM_STOPPED,
                },
            ],
        ),

        (current, LifecycleEvent::Terminate { reason }) if !current.is_terminal() => (
            SwarmState::Terminated {
                reason: reason.clone(),
            },
            vec![
                CancelLoop,
                ReleaseContext,
                Publish {
                    topic: topics::SWARM_TERMINATED,
                },
            ],
        ),

        (current, _) => {
            return Err(FlockError::InvalidTransition {
                from: current.to_string(),
                event: event.to_string(),
            })
        }
    };

    Ok(next)
}
