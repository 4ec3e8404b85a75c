//! Swarm tier facade
//!
//! Serves tier requests by running a whole swarm per execution: the request
//! input becomes the swarm goal and team, the allocation becomes its budget,
//! and the terminal lifecycle event becomes the result.

use async_trait::async_trait;
use flock_core::tier::LatencyEstimates;
use flock_core::{
    topics, BusEvent, ExecutionStatus, FlockError, ResourceAmounts, ResourcesUsed, Result,
    Subscription, SwarmId, SwarmState, TierCapabilities, TierError, TierExecutionRecord,
    TierExecutor, TierRequest, TierResult,
};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument, warn};

use crate::lifecycle::{CreateSwarmParams, SwarmManager, SwarmSummary};

/// How often a lagging lifecycle subscription falls back to the stored state
const LAG_RECHECK_MS: u64 = 100;

/// Buffered events inspected before settling on the stored state
const LAG_DRAIN_LIMIT: usize = 64;

/// Input accepted by the swarm tier
#[derive(Debug, Clone, Deserialize)]
struct SwarmInput {
    goal: String,
    #[serde(default)]
    agents: Vec<String>,
    #[serde(default)]
    constraints: Constraints,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Constraints {
    #[serde(default)]
    tasks_total: u64,
    name: Option<String>,
    adaptation_interval_ms: Option<u64>,
    consensus_threshold: Option<f64>,
}

/// How a waited-on swarm ended
enum Ending {
    Completed(Option<SwarmSummary>),
    Terminated,
}

/// Tier executor backed by the swarm lifecycle manager
pub struct SwarmTier {
    manager: Arc<SwarmManager>,
    records: RwLock<HashMap<String, TierExecutionRecord>>,
}

impl SwarmTier {
    pub fn new(manager: Arc<SwarmManager>) -> Self {
        Self {
            manager,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn manager(&self) -> &Arc<SwarmManager> {
        &self.manager
    }

    fn tier_name(&self) -> &str {
        &self.manager.config().tier.name
    }

    fn error(&self, code: &str, message: impl Into<String>) -> TierError {
        TierError::new(code, message, self.tier_name())
    }

    fn running_count(&self) -> usize {
        self.records
            .read()
            .values()
            .filter(|r| r.status == ExecutionStatus::Running)
            .count()
    }

    /// Claim a slot for `execution_id`, or explain why not
    fn admit(&self, execution_id: &str) -> std::result::Result<(), TierError> {
        let max = self.manager.config().tier.max_concurrency;
        let mut records = self.records.write();

        if records
            .get(execution_id)
            .is_some_and(|r| r.status == ExecutionStatus::Running)
        {
            return Err(self.error(
                "DUPLICATE_EXECUTION",
                format!("Execution {} is already running", execution_id),
            ));
        }

        let running = records
            .values()
            .filter(|r| r.status == ExecutionStatus::Running)
            .count();
        if running >= max {
            return Err(self.error(
                "CAPACITY_EXCEEDED",
                format!("{} executions running, limit is {}", running, max),
            ));
        }

        records.insert(
            execution_id.to_string(),
            TierExecutionRecord::running(execution_id),
        );
        Ok(())
    }

    /// Move a record to a terminal status; false if it was already terminal
    fn finish(&self, execution_id: &str, status: ExecutionStatus) -> bool {
        self.records
            .write()
            .get_mut(execution_id)
            .map(|r| r.finish(status))
            .unwrap_or(false)
    }

    fn status(&self, execution_id: &str) -> Option<ExecutionStatus> {
        self.records.read().get(execution_id).map(|r| r.status)
    }

    fn params(&self, request: &TierRequest, input: SwarmInput) -> CreateSwarmParams {
        let defaults = self.manager.config();
        let mut config = defaults.swarm_defaults.clone();
        if let Some(interval) = input.constraints.adaptation_interval_ms {
            config.adaptation_interval_ms = interval;
        }
        if let Some(threshold) = input.constraints.consensus_threshold {
            config.consensus_threshold = threshold;
        }

        let fallback = defaults.budget_for(&config);
        let allocation = request.allocation;
        let budget = ResourceAmounts {
            credits: if allocation.credits > 0 {
                allocation.credits
            } else {
                fallback.credits
            },
            tokens: if allocation.tokens > 0 {
                allocation.tokens
            } else {
                fallback.tokens
            },
            time_ms: if allocation.time_ms > 0 {
                allocation.time_ms
            } else {
                fallback.time_ms
            },
        };

        let name = input
            .constraints
            .name
            .unwrap_or_else(|| format!("exec-{}", request.execution_id));

        let mut params = CreateSwarmParams::new(name, input.goal)
            .with_config(config)
            .with_budget(budget)
            .with_agents(input.agents)
            .with_tasks_total(input.constraints.tasks_total);
        params
            .metadata
            .insert("execution_id".to_string(), json!(request.execution_id));
        params
    }

    async fn run(&self, request: &TierRequest, started: Instant) -> TierResult {
        let execution_id = request.execution_id.as_str();
        let elapsed = || started.elapsed().as_millis() as u64;

        let input: SwarmInput = match serde_json::from_value(request.input.clone()) {
            Ok(input) => input,
            Err(e) => {
                self.finish(execution_id, ExecutionStatus::Failed);
                return TierResult::failure(
                    execution_id,
                    self.error("INVALID_INPUT", format!("Invalid swarm input: {}", e)),
                    elapsed(),
                );
            }
        };

        // Subscribe before creating so a fast swarm cannot end unseen
        let mut lifecycle = self.manager.services().bus.subscribe(topics::SWARM_LIFECYCLE);

        let swarm_id = match self.manager.create_swarm(self.params(request, input)).await {
            Ok(id) => id,
            Err(e) => {
                self.finish(execution_id, ExecutionStatus::Failed);
                return TierResult::failure(
                    execution_id,
                    self.error("SWARM_CREATE_FAILED", e.to_string()),
                    elapsed(),
                );
            }
        };

        let cancelled_early = {
            let mut records = self.records.write();
            match records.get_mut(execution_id) {
                Some(record) => {
                    record.swarm_id = Some(swarm_id);
                    record.status == ExecutionStatus::Cancelled
                }
                None => false,
            }
        };
        if cancelled_early {
            self.terminate_quietly(&swarm_id).await;
            return self.cancelled(execution_id, elapsed());
        }

        info!("Execution {} runs as swarm {}", execution_id, swarm_id);

        let ending = match request.options.timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(
                    Duration::from_millis(timeout_ms),
                    self.wait_for_end(&mut lifecycle, swarm_id),
                )
                .await
                {
                    Ok(ending) => ending,
                    Err(_) => {
                        warn!(
                            "Execution {} timed out after {}ms; terminating swarm {}",
                            execution_id, timeout_ms, swarm_id
                        );
                        self.terminate_quietly(&swarm_id).await;
                        if !self.finish(execution_id, ExecutionStatus::Failed) {
                            return self.cancelled(execution_id, elapsed());
                        }
                        return TierResult::failure(
                            execution_id,
                            self.error(
                                "TIMEOUT",
                                format!("Swarm {} did not finish within {}ms", swarm_id, timeout_ms),
                            ),
                            elapsed(),
                        );
                    }
                }
            }
            None => self.wait_for_end(&mut lifecycle, swarm_id).await,
        };

        match ending {
            Ending::Completed(summary) => {
                if !self.finish(execution_id, ExecutionStatus::Completed) {
                    return self.cancelled(execution_id, elapsed());
                }
                completed_result(execution_id, swarm_id, summary, elapsed())
            }
            Ending::Terminated => {
                if !self.finish(execution_id, ExecutionStatus::Failed) {
                    return self.cancelled(execution_id, elapsed());
                }
                TierResult::failure(
                    execution_id,
                    self.error("SWARM_TERMINATED", format!("Swarm {} was terminated", swarm_id)),
                    elapsed(),
                )
            }
        }
    }

    /// Wait for the terminal lifecycle event of `swarm_id`
    ///
    /// Once the subscription has dropped events the terminal one may be among
    /// them, so the stored state is polled as well.
    async fn wait_for_end(&self, lifecycle: &mut Subscription, swarm_id: SwarmId) -> Ending {
        let mut recheck = tokio::time::interval(Duration::from_millis(LAG_RECHECK_MS));
        recheck.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                event = lifecycle.recv() => match event {
                    Some(event) => {
                        if let Some(ending) = ending_of(&event, swarm_id) {
                            return ending;
                        }
                    }
                    // The bus closed under us
                    None => return Ending::Terminated,
                },
                _ = recheck.tick(), if lifecycle.lagged() > 0 => {
                    let ending = match self.manager.state(&swarm_id).await {
                        Ok(SwarmState::Completed) => Ending::Completed(None),
                        Ok(SwarmState::Terminated { .. }) => Ending::Terminated,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!("Failed to read state of swarm {}: {}", swarm_id, e);
                            continue;
                        }
                    };
                    // Prefer the event's summary if it is still buffered
                    let buffered =
                        std::iter::from_fn(|| lifecycle.try_recv()).take(LAG_DRAIN_LIMIT);
                    for event in buffered {
                        if let Some(found) = ending_of(&event, swarm_id) {
                            return found;
                        }
                    }
                    warn!("Lost the terminal event of swarm {}; using its stored state", swarm_id);
                    return ending;
                }
            }
        }
    }

    fn cancelled(&self, execution_id: &str, duration_ms: u64) -> TierResult {
        TierResult::failure(
            execution_id,
            self.error("CANCELLED", format!("Execution {} was cancelled", execution_id)),
            duration_ms,
        )
    }

    async fn terminate_quietly(&self, swarm_id: &SwarmId) {
        if let Err(e) = self.manager.terminate_swarm(swarm_id).await {
            warn!("Failed to terminate swarm {}: {}", swarm_id, e);
        }
    }
}

fn ending_of(event: &BusEvent, swarm_id: SwarmId) -> Option<Ending> {
    if event.swarm_id() != Some(swarm_id) {
        return None;
    }
    match event.topic.as_str() {
        topics::SWARM_STOPPED => Some(Ending::Completed(summary_of(event))),
        topics::SWARM_TERMINATED => Some(Ending::Terminated),
        _ => None,
    }
}

fn summary_of(event: &BusEvent) -> Option<SwarmSummary> {
    event
        .payload
        .get("summary")
        .and_then(|s| serde_json::from_value(s.clone()).ok())
}

fn completed_result(
    execution_id: &str,
    swarm_id: SwarmId,
    summary: Option<SwarmSummary>,
    duration_ms: u64,
) -> TierResult {
    let Some(summary) = summary else {
        return TierResult::success(
            execution_id,
            json!({ "swarm_id": swarm_id, "state": "completed" }),
            ResourcesUsed {
                duration_ms,
                ..Default::default()
            },
            duration_ms,
            1.0,
        );
    };

    let consumed = summary
        .resources
        .map(|r| r.consumed)
        .unwrap_or_default();
    let used = ResourcesUsed {
        credits: consumed.credits,
        tokens: consumed.tokens,
        duration_ms,
        memory_mb: 0,
        steps: summary.ticks,
    };

    let output = json!({
        "swarm_id": swarm_id,
        "state": "completed",
        "ticks": summary.ticks,
        "tasks_completed": summary.progress.tasks_completed,
        "tasks_total": summary.progress.tasks_total,
        "decisions": {
            "total": summary.decisions_total,
            "executed": summary.decisions_executed,
            "failed": summary.decisions_failed,
        },
        "insights": summary.insights,
    });

    TierResult::success(execution_id, output, used, duration_ms, summary.confidence())
}

#[async_trait]
impl TierExecutor for SwarmTier {
    #[instrument(skip(self, request), fields(execution_id = %request.execution_id))]
    async fn execute(&self, request: TierRequest) -> TierResult {
        let started = Instant::now();
        if let Err(error) = self.admit(&request.execution_id) {
            warn!("Rejected execution {}: {}", request.execution_id, error);
            return TierResult::failure(request.execution_id, error, 0);
        }
        self.run(&request, started).await
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        let swarm_id = {
            let mut records = self.records.write();
            let record = records
                .get_mut(execution_id)
                .ok_or_else(|| FlockError::ExecutionNotFound(execution_id.to_string()))?;
            if !record.finish(ExecutionStatus::Cancelled) {
                return Ok(());
            }
            record.swarm_id
        };

        info!("Cancelled execution {}", execution_id);
        if let Some(swarm_id) = swarm_id {
            self.terminate_quietly(&swarm_id).await;
        }
        Ok(())
    }

    async fn get_execution_status(&self, execution_id: &str) -> ExecutionStatus {
        self.status(execution_id)
            .unwrap_or(ExecutionStatus::Completed)
    }

    fn get_capabilities(&self) -> TierCapabilities {
        let config = self.manager.config();
        let interval = config.swarm_defaults.adaptation_interval_ms;
        TierCapabilities {
            tier: config.tier.name.clone(),
            input_kinds: vec!["swarm_goal".to_string()],
            strategies: vec!["ooda".to_string(), "consensus".to_string()],
            max_concurrency: config.tier.max_concurrency,
            latency: LatencyEstimates {
                p50_ms: interval * 2,
                p95_ms: interval * 5,
                p99_ms: interval * 10,
            },
            resource_limits: config.budget_for(&config.swarm_defaults),
        }
    }
}

impl std::fmt::Debug for SwarmTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwarmTier")
            .field("tier", &self.tier_name())
            .field("running", &self.running_count())
            .finish()
    }
}
