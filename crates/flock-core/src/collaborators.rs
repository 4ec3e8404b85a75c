//! Collaborator contracts used by the swarm core
//!
//! Every external component the core talks to sits behind one of these
//! traits: the persisted swarm store, the event bus, the decision engine,
//! the team registry, the monitor and the resource status provider.
//! Results that may legitimately be absent are `Option`s, not errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::decision::DecisionKind;
use crate::types::{
    AgentReport, Decision, Knowledge, Progress, ResourceAmounts, ResourceState, SwarmConfig,
    SwarmId, SwarmRecord, SwarmState,
};
use crate::Result;

/// Well-known event bus topics
pub mod topics {
    pub const SWARM_CREATED: &str = "swarm.created";
    pub const SWARM_STARTED: &str = "swarm.started";
    pub const SWARM_STATE_CHANGED: &str = "swarm.state_changed";
    pub const SWARM_PAUSED: &str = "swarm.paused";
    pub const SWARM_RESUMED: &str = "swarm.resumed";
    pub const SWARM_STOPPED: &str = "swarm.stopped";
    pub const SWARM_TERMINATED: &str = "swarm.terminated";
    /// Every swarm lifecycle topic
    pub const SWARM_LIFECYCLE: &str = "swarm.*";

    pub const DECISION_EXECUTED: &str = "decision.executed";
    pub const DECISION_GENERIC: &str = "decision.generic";
    pub const TEAM_FORMED: &str = "team.formed";
    pub const RESOURCE_ALERT: &str = "resource.alert";

    /// Consumed: agent self-reports
    pub const AGENT_REPORT: &str = "agent.report";
    /// Consumed: a unit of work finished for a swarm
    pub const RUN_COMPLETED: &str = "run.completed";
}

/// Persisted swarm store
#[async_trait]
pub trait SwarmStore: Send + Sync {
    async fn create_swarm(&self, record: &SwarmRecord) -> Result<()>;

    async fn get_swarm(&self, id: &SwarmId) -> Result<Option<SwarmRecord>>;

    async fn update_swarm_state(&self, id: &SwarmId, state: &SwarmState) -> Result<()>;
}

/// An event published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub topic: String,
    pub payload: serde_json::Value,
    pub published_at: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
            published_at: Utc::now(),
        }
    }

    /// Swarm id carried in the payload, if any
    pub fn swarm_id(&self) -> Option<SwarmId> {
        self.payload
            .get("swarm_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

/// Check if a topic matches a subscription pattern (`*`, exact, or `prefix.*`)
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" || pattern == topic {
        return true;
    }

    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => false,
    }
}

/// A topic-filtered stream of bus events
pub struct Subscription {
    receiver: broadcast::Receiver<BusEvent>,
    pattern: String,
    lagged: u64,
}

impl Subscription {
    pub fn new(receiver: broadcast::Receiver<BusEvent>, pattern: impl Into<String>) -> Self {
        Self {
            receiver,
            pattern: pattern.into(),
            lagged: 0,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Events dropped so far because this subscriber fell behind
    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    /// Receive the next matching event; `None` once the bus is closed
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if topic_matches(&self.pattern, &event.topic) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Subscription '{}' lagged by {} events", self.pattern, n);
                    self.lagged += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Drain already-buffered matching events without waiting
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if topic_matches(&self.pattern, &event.topic) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Subscription '{}' lagged by {} events", self.pattern, n);
                    self.lagged += n;
                }
                Err(_) => return None,
            }
        }
    }
}

/// Publish/subscribe event bus
pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, payload: serde_json::Value);

    fn subscribe(&self, pattern: &str) -> Subscription;
}

/// Snapshot of a context's ledger counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub initial: ResourceAmounts,
    pub consumed: ResourceAmounts,
    pub remaining: ResourceAmounts,
}

/// Resource status provider
#[async_trait]
pub trait ResourceStatusProvider: Send + Sync {
    async fn get_resource_status(&self, swarm_id: &SwarmId) -> Result<Option<ResourceStatus>>;
}

/// Aggregate performance of a swarm as seen by the monitor
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub ticks: u64,
    pub decisions_executed: u64,
    pub decisions_failed: u64,
    pub success_rate: f64,
    pub average_tick_ms: f64,
}

/// Environment snapshot taken during Observe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    pub captured_at: DateTime<Utc>,
    pub tick: u64,
    pub live_swarms: usize,
}

/// Immutable observation bundle for one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Every team agent with its latest self-report, if any
    pub agent_reports: Vec<(String, Option<AgentReport>)>,
    pub resources: Option<ResourceStatus>,
    pub performance: Option<PerformanceMetrics>,
    pub environment: EnvironmentSnapshot,
}

/// Input to situation analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SituationInput {
    pub swarm_id: SwarmId,
    pub goal: String,
    pub observation: Observation,
    pub knowledge: Knowledge,
    pub progress: Progress,
}

/// Strategy output for the Orient phase; every field may be omitted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SituationAnalysis {
    #[serde(default)]
    pub assessment: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<String>,
    #[serde(default)]
    pub threats: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub facts: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub insights: Vec<String>,
}

/// Orientation summary produced by the Orient phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub assessment: Vec<String>,
    pub opportunities: Vec<String>,
    pub threats: Vec<String>,
    pub recommendations: Vec<String>,
}

impl From<&SituationAnalysis> for Orientation {
    fn from(analysis: &SituationAnalysis) -> Self {
        Self {
            assessment: analysis.assessment.clone(),
            opportunities: analysis.opportunities.clone(),
            threats: analysis.threats.clone(),
            recommendations: analysis.recommendations.clone(),
        }
    }
}

/// Input to decision generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionInput {
    pub swarm_id: SwarmId,
    pub goal: String,
    pub orientation: Orientation,
    pub progress: Progress,
    /// Budget still available to the swarm
    pub remaining: ResourceAmounts,
    pub config: SwarmConfig,
}

/// A candidate decision proposed by the strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedDecision {
    pub action: DecisionKind,
    pub rationale: String,
}

impl ProposedDecision {
    pub fn new(action: impl Into<DecisionKind>, rationale: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            rationale: rationale.into(),
        }
    }
}

/// Strategy component that reasons about the swarm
#[async_trait]
pub trait DecisionEngine: Send + Sync {
    async fn analyze_situation(&self, input: &SituationInput) -> Result<Option<SituationAnalysis>>;

    async fn generate_decisions(&self, input: &DecisionInput) -> Result<Vec<ProposedDecision>>;

    async fn adapt_strategy(&self, swarm_id: &SwarmId, directive: &str) -> Result<()>;
}

/// A member of a swarm's team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub agent_id: String,
    pub joined_at: DateTime<Utc>,
}

impl TeamMember {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            joined_at: Utc::now(),
        }
    }
}

/// A decision submitted for team consensus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub action: DecisionKind,
    pub rationale: String,
}

impl From<&Decision> for Proposal {
    fn from(decision: &Decision) -> Self {
        Self {
            id: decision.id,
            action: decision.action.clone(),
            rationale: decision.rationale.clone(),
        }
    }
}

/// Consensus score for one proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusScore {
    pub proposal_id: Uuid,
    pub score: f64,
    pub votes_for: usize,
    pub votes_against: usize,
}

/// Consensus over a batch of proposals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub results: Vec<ConsensusScore>,
    pub threshold: f64,
}

impl ConsensusOutcome {
    pub fn score_for(&self, proposal_id: &Uuid) -> Option<f64> {
        self.results
            .iter()
            .find(|r| &r.proposal_id == proposal_id)
            .map(|r| r.score)
    }
}

/// Team registry and consensus component
#[async_trait]
pub trait TeamRegistry: Send + Sync {
    async fn get_team(&self, swarm_id: &SwarmId) -> Result<Vec<TeamMember>>;

    /// Add agents to the team; returns the resulting team
    async fn form_team(&self, swarm_id: &SwarmId, agent_ids: &[String]) -> Result<Vec<TeamMember>>;

    async fn get_consensus(
        &self,
        swarm_id: &SwarmId,
        proposals: &[Proposal],
    ) -> Result<ConsensusOutcome>;

    async fn disband_team(&self, swarm_id: &SwarmId) -> Result<()>;
}

/// Input to the Reflect phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReflectionInput {
    pub swarm_id: SwarmId,
    pub tick: u64,
    /// Decisions generated during this tick, with their outcomes
    pub decisions: Vec<Decision>,
    pub progress: Progress,
    pub resources: ResourceState,
    pub tick_duration_ms: u64,
}

/// Monitor output for the Reflect phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    #[serde(default)]
    pub learnings: Vec<String>,
    #[serde(default)]
    pub adaptations: Vec<String>,
    #[serde(default)]
    pub performance_metrics: Option<PerformanceMetrics>,
}

/// Monitoring component
#[async_trait]
pub trait Monitor: Send + Sync {
    async fn get_performance_metrics(&self, swarm_id: &SwarmId) -> Result<Option<PerformanceMetrics>>;

    async fn analyze_performance(&self, input: &ReflectionInput) -> Result<Option<Reflection>>;
}
