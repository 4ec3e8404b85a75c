//! Tier communication contract
//!
//! The request/response shape every tier speaks. The swarm subsystem serves
//! requests through it and delegates routines to the tier below it through
//! the same trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ResourceAmounts, SwarmId};
use crate::Result;

/// Request priority
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" | "0" => Ok(Self::Critical),
            "high" | "1" => Ok(Self::High),
            "medium" | "2" => Ok(Self::Medium),
            "low" | "3" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// How often a failed delegation is re-issued
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff_ms: u64,
}

/// Execution options carried by a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOptions {
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Give up (and force-terminate) after this long
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// A unit of work handed to a tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRequest {
    /// Caller-assigned execution id
    pub execution_id: String,
    /// Opaque input payload
    pub input: serde_json::Value,
    /// Resource ceiling for this execution
    pub allocation: ResourceAmounts,
    #[serde(default)]
    pub options: ExecutionOptions,
}

impl TierRequest {
    pub fn new(
        execution_id: impl Into<String>,
        input: serde_json::Value,
        allocation: ResourceAmounts,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            input,
            allocation,
            options: ExecutionOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }
}

/// Resources reported by a tier for one execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcesUsed {
    #[serde(default)]
    pub credits: u64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub memory_mb: u64,
    #[serde(default)]
    pub steps: u64,
}

impl ResourcesUsed {
    /// The ledger-tracked part of this usage
    pub fn as_amounts(&self) -> ResourceAmounts {
        ResourceAmounts::new(self.credits, self.tokens, self.duration_ms)
    }
}

/// Structured error returned by a tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierError {
    pub code: String,
    pub message: String,
    /// Tier where the error originated
    pub tier: String,
}

impl TierError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, tier: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            tier: tier.into(),
        }
    }
}

impl std::fmt::Display for TierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {} (tier: {})", self.code, self.message, self.tier)
    }
}

impl From<TierError> for crate::FlockError {
    fn from(err: TierError) -> Self {
        Self::Delegation {
            code: err.code,
            message: err.message,
            tier: err.tier,
        }
    }
}

/// Result of one tier execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierResult {
    pub execution_id: String,
    pub success: bool,
    pub output: serde_json::Value,
    pub resources_used: ResourcesUsed,
    pub duration_ms: u64,
    /// Confidence/performance score (0.0 - 1.0)
    pub confidence: f64,
    pub error: Option<TierError>,
}

impl TierResult {
    pub fn success(
        execution_id: impl Into<String>,
        output: serde_json::Value,
        resources_used: ResourcesUsed,
        duration_ms: u64,
        confidence: f64,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            success: true,
            output,
            resources_used,
            duration_ms,
            confidence,
            error: None,
        }
    }

    /// Failed result; failures report zero resource usage
    pub fn failure(execution_id: impl Into<String>, error: TierError, duration_ms: u64) -> Self {
        Self {
            execution_id: execution_id.into(),
            success: false,
            output: serde_json::Value::Null,
            resources_used: ResourcesUsed::default(),
            duration_ms,
            confidence: 0.0,
            error: Some(error),
        }
    }
}

/// Status of a tier execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Tracks one in-flight or finished execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierExecutionRecord {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub swarm_id: Option<SwarmId>,
}

impl TierExecutionRecord {
    pub fn running(execution_id: impl Into<String>) -> Self {
        Self {
            execution_id: execution_id.into(),
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            swarm_id: None,
        }
    }

    /// Move to a terminal status; terminal records are left unchanged
    pub fn finish(&mut self, status: ExecutionStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
        true
    }
}

/// Latency percentile estimates in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyEstimates {
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

/// Static metadata describing what a tier accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCapabilities {
    pub tier: String,
    pub input_kinds: Vec<String>,
    pub strategies: Vec<String>,
    pub max_concurrency: usize,
    pub latency: LatencyEstimates,
    pub resource_limits: ResourceAmounts,
}

/// The tier contract
#[async_trait]
pub trait TierExecutor: Send + Sync {
    /// Run a request to completion; failures are reported in the result
    async fn execute(&self, request: TierRequest) -> TierResult;

    /// Cancel an execution; idempotent once terminal
    async fn cancel_execution(&self, execution_id: &str) -> Result<()>;

    /// Last recorded status; unknown ids report `Completed`
    async fn get_execution_status(&self, execution_id: &str) -> ExecutionStatus;

    fn get_capabilities(&self) -> TierCapabilities;
}
