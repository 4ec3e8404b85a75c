//! OODA loop driver
//!
//! One tick runs Observe, Orient, Decide, Act and Reflect strictly in order
//! against a swarm's execution context. The cancellation token is checked at
//! every phase boundary; a cancelled tick abandons its remaining phases.
//!
//! Decision failures are recorded on the decision and never abort the batch.
//! Any other error abandons the tick and is returned to the scheduler, which
//! logs it and keeps the schedule.

use flock_core::fail_open::{fail_open, fail_open_optional};
use flock_core::{
    topics, Decision, DecisionInput, DecisionKind, DecisionOutcome, EnvironmentSnapshot,
    ExecutionContext, ExecutionOptions, FlockError, Observation, Orientation, Proposal,
    ProgressUpdate, ReflectionInput, ResourceAmounts, ResourceKind, ResourceStatus, Result,
    RetryPolicy, SituationInput, SwarmConfig, TierError, TierRequest, TierResult,
};
use serde_json::json;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::services::Services;

/// Allocation key for credits not assigned to a specific agent
pub const POOL_ALLOCATION: &str = "pool";

/// Phases of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Observe,
    Orient,
    Decide,
    Act,
    Reflect,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Observe => write!(f, "observe"),
            Self::Orient => write!(f, "orient"),
            Self::Decide => write!(f, "decide"),
            Self::Act => write!(f, "act"),
            Self::Reflect => write!(f, "reflect"),
        }
    }
}

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    /// Last phase that ran to completion
    pub completed_phase: Option<Phase>,
    pub generated: usize,
    pub approved: usize,
    pub executed: usize,
    pub failed: usize,
    /// A budget kind fell to or below the critical share
    pub resource_alert: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

/// Runs OODA ticks against execution contexts
#[derive(Clone)]
pub struct OodaDriver {
    services: Services,
    routine_cost: u64,
    retry: RetryPolicy,
}

impl OodaDriver {
    pub fn new(services: Services, routine_cost: u64) -> Self {
        Self {
            services,
            routine_cost,
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy applied to subordinate delegation
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run one full tick
    #[instrument(skip(self, ctx, config, cancel), fields(swarm_id = %ctx.swarm_id, tick = ctx.ticks + 1))]
    pub async fn run_tick(
        &self,
        ctx: &mut ExecutionContext,
        config: &SwarmConfig,
        live_swarms: usize,
        cancel: &CancellationToken,
    ) -> Result<TickReport> {
        let started = Instant::now();
        ctx.ticks += 1;
        let mut report = TickReport {
            tick: ctx.ticks,
            ..Default::default()
        };

        let observation = self.observe(ctx, config, live_swarms, &mut report).await;
        if self.abandoned(cancel, Phase::Observe, &mut report) {
            return Ok(finish(report, started));
        }

        let orientation = self.orient(ctx, config, observation).await?;
        if self.abandoned(cancel, Phase::Orient, &mut report) {
            return Ok(finish(report, started));
        }

        let first_new = ctx.knowledge.decisions.len();
        let approved = self.decide(ctx, config, orientation, &mut report).await?;
        if self.abandoned(cancel, Phase::Decide, &mut report) {
            return Ok(finish(report, started));
        }

        self.act(ctx, config, approved, &mut report).await;
        self.refresh_resources(ctx).await;
        if self.abandoned(cancel, Phase::Act, &mut report) {
            return Ok(finish(report, started));
        }

        let tick_decisions = ctx.knowledge.decisions[first_new..].to_vec();
        self.reflect(ctx, config, tick_decisions, started).await?;
        report.completed_phase = Some(Phase::Reflect);

        debug!(
            "Tick {} done: {} generated, {} approved, {} executed, {} failed",
            report.tick, report.generated, report.approved, report.executed, report.failed
        );
        Ok(finish(report, started))
    }

    fn abandoned(&self, cancel: &CancellationToken, phase: Phase, report: &mut TickReport) -> bool {
        report.completed_phase = Some(phase);
        if cancel.is_cancelled() {
            debug!("Tick {} cancelled after {}", report.tick, phase);
            report.cancelled = true;
            return true;
        }
        false
    }

    async fn observe(
        &self,
        ctx: &mut ExecutionContext,
        config: &SwarmConfig,
        live_swarms: usize,
        report: &mut TickReport,
    ) -> Observation {
        let s = &self.services;
        let id = ctx.swarm_id;

        let team = fail_open("get_team", s.team.get_team(&id))
            .await
            .unwrap_or_default();
        let mut agent_reports: Vec<_> = team
            .iter()
            .map(|m| (m.agent_id.clone(), ctx.agent_reports.get(&m.agent_id).cloned()))
            .collect();
        for (agent_id, agent_report) in &ctx.agent_reports {
            if !team.iter().any(|m| &m.agent_id == agent_id) {
                agent_reports.push((agent_id.clone(), Some(agent_report.clone())));
            }
        }

        let resources = fail_open_optional("get_resource_status", s.resources.get_resource_status(&id)).await;
        let performance =
            fail_open_optional("get_performance_metrics", s.monitor.get_performance_metrics(&id)).await;

        if let Some(status) = &resources {
            ctx.resources.total = status.initial;
            ctx.resources.used = status.consumed;

            if let Some(kind) = critical_kind(status, config.critical_resource_ratio) {
                warn!(
                    "Swarm {} is low on {}: {} of {} remaining",
                    id,
                    kind,
                    status.remaining.get(kind),
                    status.initial.get(kind)
                );
                s.bus.publish(
                    topics::RESOURCE_ALERT,
                    json!({
                        "swarm_id": id,
                        "kind": kind,
                        "remaining": status.remaining.get(kind),
                        "initial": status.initial.get(kind),
                    }),
                );
                report.resource_alert = true;
            }
        }

        Observation {
            agent_reports,
            resources,
            performance,
            environment: EnvironmentSnapshot {
                captured_at: chrono::Utc::now(),
                tick: ctx.ticks,
                live_swarms,
            },
        }
    }

    async fn orient(
        &self,
        ctx: &mut ExecutionContext,
        config: &SwarmConfig,
        observation: Observation,
    ) -> Result<Orientation> {
        let input = SituationInput {
            swarm_id: ctx.swarm_id,
            goal: ctx.goal.clone(),
            observation,
            knowledge: ctx.knowledge.clone(),
            progress: ctx.progress.clone(),
        };

        let analysis = with_deadline(
            config.decision_timeout_ms,
            "analyze_situation",
            self.services.engine.analyze_situation(&input),
        )
        .await?
        .unwrap_or_default();

        // Last write wins per fact key
        ctx.knowledge.facts.extend(analysis.facts.clone());
        ctx.knowledge.insights.extend(analysis.insights.iter().cloned());

        Ok(Orientation::from(&analysis))
    }

    /// Returns the indices of approved decisions in the knowledge log
    async fn decide(
        &self,
        ctx: &mut ExecutionContext,
        config: &SwarmConfig,
        orientation: Orientation,
        report: &mut TickReport,
    ) -> Result<Vec<usize>> {
        let input = DecisionInput {
            swarm_id: ctx.swarm_id,
            goal: ctx.goal.clone(),
            orientation,
            progress: ctx.progress.clone(),
            remaining: ctx.resources.remaining(),
            config: config.clone(),
        };

        let proposed = with_deadline(
            config.decision_timeout_ms,
            "generate_decisions",
            self.services.engine.generate_decisions(&input),
        )
        .await?;

        // Every candidate is logged, approved or not
        let first = ctx.knowledge.decisions.len();
        ctx.knowledge.decisions.extend(
            proposed
                .into_iter()
                .map(|p| Decision::new(p.action, p.rationale)),
        );
        let batch = &ctx.knowledge.decisions[first..];
        report.generated = batch.len();
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let proposals: Vec<Proposal> = batch.iter().map(Proposal::from).collect();
        let consensus = self
            .services
            .team
            .get_consensus(&ctx.swarm_id, &proposals)
            .await?;

        let approved: Vec<usize> = batch
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                consensus
                    .score_for(&d.id)
                    .is_some_and(|score| score >= config.consensus_threshold)
            })
            .map(|(i, _)| first + i)
            .collect();

        report.approved = approved.len();
        Ok(approved)
    }

    async fn act(
        &self,
        ctx: &mut ExecutionContext,
        config: &SwarmConfig,
        approved: Vec<usize>,
        report: &mut TickReport,
    ) {
        for index in approved {
            let decision = ctx.knowledge.decisions[index].clone();

            let outcome = match self.execute(ctx, config, &decision.action).await {
                Ok(()) => {
                    report.executed += 1;
                    self.services.bus.publish(
                        topics::DECISION_EXECUTED,
                        json!({
                            "swarm_id": ctx.swarm_id,
                            "decision_id": decision.id,
                            "action": decision.descriptor(),
                        }),
                    );
                    DecisionOutcome::Executed
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Decision {} failed: {}", decision.descriptor(), e);
                    DecisionOutcome::Failed(e.to_string())
                }
            };

            ctx.knowledge.decisions[index].outcome = Some(outcome);
        }
    }

    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        config: &SwarmConfig,
        action: &DecisionKind,
    ) -> Result<()> {
        let s = &self.services;
        let id = ctx.swarm_id;

        match action {
            DecisionKind::AllocateResources { agent_id, amount } => {
                let reservation = s.ledger.reserve(&id.to_string(), ResourceKind::Credits, *amount)?;
                s.ledger.commit(&reservation)?;

                let key = agent_id.clone().unwrap_or_else(|| POOL_ALLOCATION.to_string());
                *ctx.resources.allocations.entry(key).or_default() += amount;
                Ok(())
            }

            DecisionKind::FormTeam { agent_ids } => {
                let team = s.team.get_team(&id).await?;
                let joining = agent_ids
                    .iter()
                    .filter(|a| !team.iter().any(|m| &&m.agent_id == a))
                    .collect::<std::collections::HashSet<_>>()
                    .len();
                if team.len() + joining > config.max_agents {
                    return Err(FlockError::Team(format!(
                        "Team would have {} members, max_agents is {}",
                        team.len() + joining,
                        config.max_agents
                    )));
                }

                let team = s.team.form_team(&id, agent_ids).await?;
                s.bus.publish(
                    topics::TEAM_FORMED,
                    json!({
                        "swarm_id": id,
                        "members": team.iter().map(|m| m.agent_id.clone()).collect::<Vec<_>>(),
                    }),
                );
                Ok(())
            }

            DecisionKind::ExecuteRoutine { routine_id, params } => {
                self.execute_routine(ctx, routine_id, params).await
            }

            DecisionKind::AdaptStrategy { directive } => {
                s.engine.adapt_strategy(&id, directive).await
            }

            DecisionKind::Generic { descriptor } => {
                s.bus.publish(
                    topics::DECISION_GENERIC,
                    json!({ "swarm_id": id, "descriptor": descriptor }),
                );
                Ok(())
            }
        }
    }

    /// Reserve the routine's ceiling, delegate it, then settle or roll back
    async fn execute_routine(
        &self,
        ctx: &mut ExecutionContext,
        routine_id: &str,
        params: &serde_json::Value,
    ) -> Result<()> {
        let s = &self.services;
        let tier = s
            .subordinate
            .as_ref()
            .ok_or_else(|| FlockError::DecisionFailed("no subordinate tier configured".to_string()))?;

        let context_id = ctx.swarm_id.to_string();
        let ceiling = params
            .get("credits")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.routine_cost);
        let reservation = s.ledger.reserve(&context_id, ResourceKind::Credits, ceiling)?;

        let request = TierRequest::new(
            format!("{}-{}", routine_id, Uuid::new_v4()),
            json!({
                "swarm_id": ctx.swarm_id,
                "routine_id": routine_id,
                "params": params,
            }),
            ResourceAmounts::credits(ceiling),
        )
        .with_options(ExecutionOptions {
            retry: self.retry,
            ..Default::default()
        });

        let result = self.delegate(tier.as_ref(), request).await;
        if !result.success {
            s.ledger.rollback(&reservation)?;
            let error = result.error.unwrap_or_else(|| {
                TierError::new("UNKNOWN", "delegation failed without an error", "unknown")
            });
            return Err(error.into());
        }

        match s.ledger.settle(&reservation, result.resources_used.as_amounts()) {
            Ok(settled) => s.ledger.commit(&settled)?,
            Err(e) => {
                // The work happened; the ceiling stays charged
                s.ledger.commit(&reservation)?;
                return Err(e);
            }
        }

        ctx.apply_progress(&ProgressUpdate::completed(1));
        Ok(())
    }

    async fn delegate(&self, tier: &dyn flock_core::TierExecutor, request: TierRequest) -> TierResult {
        let mut attempt = 0;
        loop {
            let result = tier.execute(request.clone()).await;
            if result.success || attempt >= self.retry.max_retries {
                return result;
            }

            attempt += 1;
            debug!(
                "Retrying {} (attempt {} of {})",
                request.execution_id, attempt, self.retry.max_retries
            );
            if self.retry.backoff_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.retry.backoff_ms)).await;
            }
        }
    }

    /// Mirror the ledger into the context after Act
    async fn refresh_resources(&self, ctx: &mut ExecutionContext) {
        let status = fail_open_optional(
            "get_resource_status",
            self.services.resources.get_resource_status(&ctx.swarm_id),
        )
        .await;
        if let Some(status) = status {
            ctx.resources.total = status.initial;
            ctx.resources.used = status.consumed;
        }
    }

    async fn reflect(
        &self,
        ctx: &mut ExecutionContext,
        config: &SwarmConfig,
        decisions: Vec<Decision>,
        started: Instant,
    ) -> Result<()> {
        let input = ReflectionInput {
            swarm_id: ctx.swarm_id,
            tick: ctx.ticks,
            decisions,
            progress: ctx.progress.clone(),
            resources: ctx.resources.clone(),
            tick_duration_ms: started.elapsed().as_millis() as u64,
        };

        let reflection = fail_open_optional(
            "analyze_performance",
            self.services.monitor.analyze_performance(&input),
        )
        .await;

        let Some(reflection) = reflection else {
            return Ok(());
        };
        if !config.learning_enabled {
            return Ok(());
        }

        ctx.knowledge.insights.extend(reflection.learnings);
        for directive in &reflection.adaptations {
            fail_open(
                "adapt_strategy",
                self.services.engine.adapt_strategy(&ctx.swarm_id, directive),
            )
            .await;
        }
        Ok(())
    }
}

fn finish(mut report: TickReport, started: Instant) -> TickReport {
    report.duration_ms = started.elapsed().as_millis() as u64;
    report
}

/// First kind whose remaining balance is at or below `ratio` of its initial budget
fn critical_kind(status: &ResourceStatus, ratio: f64) -> Option<ResourceKind> {
    ResourceKind::ALL.into_iter().find(|kind| {
        let initial = status.initial.get(*kind);
        initial > 0 && (status.remaining.get(*kind) as f64) <= initial as f64 * ratio
    })
}

/// Bound a strategy call by the swarm's decision timeout
async fn with_deadline<T>(
    timeout_ms: u64,
    operation: &str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(result) => result,
        Err(_) => Err(FlockError::Engine(format!(
            "{} timed out after {}ms",
            operation, timeout_ms
        ))),
    }
}
