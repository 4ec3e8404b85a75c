//! Core type definitions for Flock swarm coordination

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::decision::DecisionKind;
use crate::{FlockError, Result};

/// Opaque swarm identifier, generated at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwarmId(Uuid);

impl SwarmId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SwarmId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SwarmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SwarmId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| format!("Invalid swarm ID: {}", s))
    }
}

/// The three independently tracked resource kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Credits,
    Tokens,
    /// Wall-clock time in milliseconds
    Time,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [Self::Credits, Self::Tokens, Self::Time];
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credits => write!(f, "credits"),
            Self::Tokens => write!(f, "tokens"),
            Self::Time => write!(f, "time"),
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "credits" | "credit" => Ok(Self::Credits),
            "tokens" | "token" => Ok(Self::Tokens),
            "time" | "time_ms" => Ok(Self::Time),
            _ => Err(format!("Invalid resource kind: {}", s)),
        }
    }
}

/// Amounts of credits, tokens and time (ms) considered together
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAmounts {
    #[serde(default)]
    pub credits: u64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub time_ms: u64,
}

impl ResourceAmounts {
    pub fn new(credits: u64, tokens: u64, time_ms: u64) -> Self {
        Self {
            credits,
            tokens,
            time_ms,
        }
    }

    pub fn credits(credits: u64) -> Self {
        Self {
            credits,
            ..Default::default()
        }
    }

    pub fn get(&self, kind: ResourceKind) -> u64 {
        match kind {
            ResourceKind::Credits => self.credits,
            ResourceKind::Tokens => self.tokens,
            ResourceKind::Time => self.time_ms,
        }
    }

    pub fn with(mut self, kind: ResourceKind, amount: u64) -> Self {
        match kind {
            ResourceKind::Credits => self.credits = amount,
            ResourceKind::Tokens => self.tokens = amount,
            ResourceKind::Time => self.time_ms = amount,
        }
        self
    }

    pub fn is_zero(&self) -> bool {
        self.credits == 0 && self.tokens == 0 && self.time_ms == 0
    }

    pub fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            credits: self.credits.saturating_sub(other.credits),
            tokens: self.tokens.saturating_sub(other.tokens),
            time_ms: self.time_ms.saturating_sub(other.time_ms),
        }
    }
}

/// Why a swarm is suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    /// Paused by an explicit call
    Manual,
    /// Paused after a critical resource alert (the PAUSED variant)
    ResourceAlert,
}

/// Swarm lifecycle state
///
/// `Forming -> Planning -> Executing <-> Suspended -> Completed`, with
/// `Terminated` reachable from every non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SwarmState {
    Forming,
    Planning,
    Executing,
    Suspended { reason: SuspendReason },
    Completed,
    Terminated { reason: String },
}

impl SwarmState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Terminated { .. })
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }

    /// Whether the swarm should have a running OODA schedule
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Planning | Self::Executing)
    }
}

impl std::fmt::Display for SwarmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Forming => write!(f, "forming"),
            Self::Planning => write!(f, "planning"),
            Self::Executing => write!(f, "executing"),
            Self::Suspended {
                reason: SuspendReason::Manual,
            } => write!(f, "suspended"),
            Self::Suspended {
                reason: SuspendReason::ResourceAlert,
            } => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Terminated { .. } => write!(f, "terminated"),
        }
    }
}

/// Per-swarm configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    #[serde(default = "default_min_agents")]
    pub min_agents: usize,

    /// Minimum consensus score (0.0 - 1.0) for a decision to be executed
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,

    #[serde(default = "default_decision_timeout_ms")]
    pub decision_timeout_ms: u64,

    /// Interval between OODA ticks
    #[serde(default = "default_adaptation_interval_ms")]
    pub adaptation_interval_ms: u64,

    #[serde(default = "default_true")]
    pub resource_optimization: bool,

    #[serde(default = "default_true")]
    pub learning_enabled: bool,

    /// Total credit budget; falls back to the configured default
    #[serde(default)]
    pub total_budget: Option<u64>,

    #[serde(default)]
    pub token_budget: Option<u64>,

    #[serde(default)]
    pub time_budget_ms: Option<u64>,

    /// Share of `tasks_total` that counts as goal completion
    #[serde(default = "default_completion_ratio")]
    pub completion_ratio: f64,

    /// Remaining share of any budget kind at which a resource alert fires
    #[serde(default = "default_critical_resource_ratio")]
    pub critical_resource_ratio: f64,
}

fn default_max_agents() -> usize {
    10
}

fn default_min_agents() -> usize {
    1
}

fn default_consensus_threshold() -> f64 {
    0.7
}

fn default_decision_timeout_ms() -> u64 {
    30_000
}

fn default_adaptation_interval_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_completion_ratio() -> f64 {
    0.8
}

fn default_critical_resource_ratio() -> f64 {
    0.05
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            min_agents: default_min_agents(),
            consensus_threshold: default_consensus_threshold(),
            decision_timeout_ms: default_decision_timeout_ms(),
            adaptation_interval_ms: default_adaptation_interval_ms(),
            resource_optimization: true,
            learning_enabled: true,
            total_budget: None,
            token_budget: None,
            time_budget_ms: None,
            completion_ratio: default_completion_ratio(),
            critical_resource_ratio: default_critical_resource_ratio(),
        }
    }
}

impl SwarmConfig {
    pub fn with_total_budget(mut self, credits: u64) -> Self {
        self.total_budget = Some(credits);
        self
    }

    pub fn with_adaptation_interval_ms(mut self, interval_ms: u64) -> Self {
        self.adaptation_interval_ms = interval_ms;
        self
    }

    pub fn with_consensus_threshold(mut self, threshold: f64) -> Self {
        self.consensus_threshold = threshold;
        self
    }

    /// Reject configurations the lifecycle cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_agents == 0 {
            return Err(FlockError::InvalidConfig(
                "max_agents must be at least 1".to_string(),
            ));
        }
        if self.min_agents > self.max_agents {
            return Err(FlockError::InvalidConfig(format!(
                "min_agents ({}) exceeds max_agents ({})",
                self.min_agents, self.max_agents
            )));
        }
        if !(0.0..=1.0).contains(&self.consensus_threshold) {
            return Err(FlockError::InvalidConfig(format!(
                "consensus_threshold must be within 0.0..=1.0, got {}",
                self.consensus_threshold
            )));
        }
        if self.adaptation_interval_ms == 0 {
            return Err(FlockError::InvalidConfig(
                "adaptation_interval_ms must be positive".to_string(),
            ));
        }
        if !(self.completion_ratio > 0.0 && self.completion_ratio <= 1.0) {
            return Err(FlockError::InvalidConfig(format!(
                "completion_ratio must be within (0.0, 1.0], got {}",
                self.completion_ratio
            )));
        }
        if !(0.0..1.0).contains(&self.critical_resource_ratio) {
            return Err(FlockError::InvalidConfig(format!(
                "critical_resource_ratio must be within 0.0..1.0, got {}",
                self.critical_resource_ratio
            )));
        }
        Ok(())
    }
}

/// Persisted swarm record (source of truth across restarts)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmRecord {
    pub id: SwarmId,
    pub name: String,
    pub description: String,
    pub goal: String,
    pub state: SwarmState,
    pub config: SwarmConfig,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A milestone on the way to the goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub name: String,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            completed: false,
            completed_at: None,
        }
    }

    pub fn complete(&mut self) {
        if !self.completed {
            self.completed = true;
            self.completed_at = Some(Utc::now());
        }
    }
}

/// Progress toward the swarm goal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub tasks_completed: u64,
    pub tasks_total: u64,
    pub milestones: Vec<Milestone>,
    pub current_phase: String,
}

impl Progress {
    /// `tasks_completed >= max(1, ratio * tasks_total)`
    pub fn goal_reached(&self, completion_ratio: f64) -> bool {
        let needed = (completion_ratio * self.tasks_total as f64).max(1.0);
        self.tasks_completed as f64 >= needed
    }
}

/// A change to apply to a swarm's progress
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressUpdate {
    #[serde(default)]
    pub tasks_completed: u64,
    #[serde(default)]
    pub tasks_total: Option<u64>,
    #[serde(default)]
    pub milestone_completed: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
}

impl ProgressUpdate {
    pub fn completed(tasks: u64) -> Self {
        Self {
            tasks_completed: tasks,
            ..Default::default()
        }
    }
}

/// Budget view kept on the execution context, mirrored from the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub total: ResourceAmounts,
    pub used: ResourceAmounts,
    /// Credits allocated per agent id (`pool` for unassigned allocations)
    pub allocations: BTreeMap<String, u64>,
}

impl ResourceState {
    pub fn new(total: ResourceAmounts) -> Self {
        Self {
            total,
            used: ResourceAmounts::default(),
            allocations: BTreeMap::new(),
        }
    }

    pub fn remaining(&self) -> ResourceAmounts {
        self.total.saturating_sub(&self.used)
    }
}

/// Accumulated knowledge of a swarm
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Knowledge {
    pub facts: BTreeMap<String, serde_json::Value>,
    pub insights: Vec<String>,
    /// Append-only decision log
    pub decisions: Vec<Decision>,
}

/// Latest self-report of one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_id: String,
    pub reported_at: DateTime<Utc>,
    pub report: serde_json::Value,
}

/// In-memory working state of a live swarm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub swarm_id: SwarmId,
    pub goal: String,
    pub progress: Progress,
    pub resources: ResourceState,
    pub knowledge: Knowledge,
    #[serde(default)]
    pub agent_reports: BTreeMap<String, AgentReport>,
    /// Number of OODA ticks run
    #[serde(default)]
    pub ticks: u64,
}

impl ExecutionContext {
    pub fn new(swarm_id: SwarmId, goal: impl Into<String>, budget: ResourceAmounts) -> Self {
        Self {
            swarm_id,
            goal: goal.into(),
            progress: Progress {
                current_phase: "forming".to_string(),
                ..Default::default()
            },
            resources: ResourceState::new(budget),
            knowledge: Knowledge::default(),
            agent_reports: BTreeMap::new(),
            ticks: 0,
        }
    }

    /// Apply a progress update. The goal-completion check is the caller's job.
    pub fn apply_progress(&mut self, update: &ProgressUpdate) {
        self.progress.tasks_completed = self
            .progress
            .tasks_completed
            .saturating_add(update.tasks_completed);
        if let Some(total) = update.tasks_total {
            self.progress.tasks_total = total;
        }
        if let Some(milestone) = &update.milestone_completed {
            match self
                .progress
                .milestones
                .iter_mut()
                .find(|m| &m.id == milestone)
            {
                Some(existing) => existing.complete(),
                None => {
                    let mut created = Milestone::new(milestone.clone(), milestone.clone());
                    created.complete();
                    self.progress.milestones.push(created);
                }
            }
        }
        if let Some(phase) = &update.phase {
            self.progress.current_phase = phase.clone();
        }
    }

    pub fn decisions_with_outcome(&self, executed: bool) -> usize {
        self.knowledge
            .decisions
            .iter()
            .filter(|d| match &d.outcome {
                Some(DecisionOutcome::Executed) => executed,
                Some(DecisionOutcome::Failed(_)) => !executed,
                None => false,
            })
            .count()
    }
}

/// Outcome of an executed (or attempted) decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Executed,
    Failed(String),
}

impl std::fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executed => write!(f, "executed"),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// One proposed unit of action, kept in the append-only decision log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub action: DecisionKind,
    pub rationale: String,
    pub outcome: Option<DecisionOutcome>,
}

impl Decision {
    pub fn new(action: DecisionKind, rationale: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            action,
            rationale: rationale.into(),
            outcome: None,
        }
    }

    /// Free-text action descriptor, e.g. `allocate_resources(900)`
    pub fn descriptor(&self) -> String {
        self.action.to_string()
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.is_none()
    }
}
