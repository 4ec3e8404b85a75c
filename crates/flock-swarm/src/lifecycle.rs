//! Swarm lifecycle manager
//!
//! Owns the live map from swarm id to execution context, drives lifecycle
//! transitions through the pure state machine, and keeps one OODA schedule
//! per active swarm.
//!
//! Lock order: a transition holds its swarm's transition lock and may then
//! take that swarm's context lock. Transitions on different swarms never share
//! a lock. A tick holds its context lock only while the driver runs and
//! never requests a transition before releasing it.

use async_trait::async_trait;
use chrono::Utc;
use flock_core::fail_open::fail_open;
use flock_core::{
    topics, AgentReport, BusEvent, ExecutionContext, FlockConfig, FlockError, Progress,
    ProgressUpdate, ResourceAmounts, ResourceStatus, Result, SuspendReason, SwarmConfig, SwarmId,
    SwarmRecord, SwarmState,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ooda::{OodaDriver, TickReport};
use crate::scheduler::{TickControl, TickHandler, TickScheduler};
use crate::services::Services;
use crate::state_machine::{transition, LifecycleAction, LifecycleEvent};

/// Reason recorded on forced termination
pub const FORCED_TERMINATION: &str = "forced_termination";

/// Parameters for creating a swarm
#[derive(Debug, Clone, Default)]
pub struct CreateSwarmParams {
    pub name: String,
    pub description: String,
    pub goal: String,
    /// Falls back to the process defaults
    pub config: Option<SwarmConfig>,
    /// Falls back to the configured budget for `config`
    pub budget: Option<ResourceAmounts>,
    /// Initial team
    pub agent_ids: Vec<String>,
    /// Initial estimate of tasks needed for the goal
    pub tasks_total: u64,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl CreateSwarmParams {
    pub fn new(name: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            goal: goal.into(),
            ..Default::default()
        }
    }

    pub fn with_config(mut self, config: SwarmConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_budget(mut self, budget: ResourceAmounts) -> Self {
        self.budget = Some(budget);
        self
    }

    pub fn with_agents(mut self, agent_ids: Vec<String>) -> Self {
        self.agent_ids = agent_ids;
        self
    }

    pub fn with_tasks_total(mut self, tasks_total: u64) -> Self {
        self.tasks_total = tasks_total;
        self
    }
}

/// Final account of a swarm, carried on terminal lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmSummary {
    pub swarm_id: SwarmId,
    pub ticks: u64,
    pub progress: Progress,
    pub decisions_total: usize,
    pub decisions_executed: usize,
    pub decisions_failed: usize,
    pub insights: Vec<String>,
    pub resources: Option<ResourceStatus>,
}

impl SwarmSummary {
    fn from_context(ctx: &ExecutionContext, resources: Option<ResourceStatus>) -> Self {
        Self {
            swarm_id: ctx.swarm_id,
            ticks: ctx.ticks,
            progress: ctx.progress.clone(),
            decisions_total: ctx.knowledge.decisions.len(),
            decisions_executed: ctx.decisions_with_outcome(true),
            decisions_failed: ctx.decisions_with_outcome(false),
            insights: ctx.knowledge.insights.clone(),
            resources,
        }
    }

    /// Executed share of attempted decisions; 1.0 when none were attempted
    pub fn confidence(&self) -> f64 {
        let attempted = self.decisions_executed + self.decisions_failed;
        if attempted == 0 {
            return 1.0;
        }
        self.decisions_executed as f64 / attempted as f64
    }
}

struct LiveSwarm {
    context: Arc<tokio::sync::Mutex<ExecutionContext>>,
    config: SwarmConfig,
}

/// Coordinator for every swarm in the process
pub struct SwarmManager {
    services: Services,
    config: FlockConfig,
    driver: OodaDriver,
    scheduler: TickScheduler,
    live: Mutex<HashMap<SwarmId, LiveSwarm>>,
    transitions: Mutex<HashMap<SwarmId, Arc<tokio::sync::Mutex<()>>>>,
    shutdown: CancellationToken,
    me: Weak<SwarmManager>,
}

/// Scheduler-facing handle that does not keep the manager alive
struct ManagerTicks(Weak<SwarmManager>);

#[async_trait]
impl TickHandler for ManagerTicks {
    async fn tick(&self, swarm_id: SwarmId, cancel: &CancellationToken) -> Result<TickControl> {
        match self.0.upgrade() {
            Some(manager) => manager.tick(swarm_id, cancel).await,
            None => Ok(TickControl::Stop),
        }
    }
}

impl SwarmManager {
    pub fn new(services: Services, config: FlockConfig) -> Arc<Self> {
        let driver = OodaDriver::new(services.clone(), config.tier.routine_cost);
        Self::with_driver(services, config, driver)
    }

    /// Build with a custom-configured driver (retry policy etc.)
    pub fn with_driver(services: Services, config: FlockConfig, driver: OodaDriver) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            services,
            config,
            driver,
            scheduler: TickScheduler::new(),
            live: Mutex::new(HashMap::new()),
            transitions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            me: me.clone(),
        })
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    /// Create, persist and start a swarm
    pub async fn create_swarm(&self, params: CreateSwarmParams) -> Result<SwarmId> {
        let config = params
            .config
            .unwrap_or_else(|| self.config.swarm_defaults.clone());
        config.validate()?;
        if params.agent_ids.len() > config.max_agents {
            return Err(FlockError::InvalidConfig(format!(
                "{} agents supplied, max_agents is {}",
                params.agent_ids.len(),
                config.max_agents
            )));
        }
        let budget = params
            .budget
            .unwrap_or_else(|| self.config.budget_for(&config));

        let now = Utc::now();
        let record = SwarmRecord {
            id: SwarmId::new(),
            name: params.name,
            description: params.description,
            goal: params.goal,
            state: SwarmState::Forming,
            config: config.clone(),
            metadata: params.metadata,
            created_at: now,
            updated_at: now,
        };
        let id = record.id;

        // Nothing is registered until the record is persisted
        self.services.store.create_swarm(&record).await?;

        self.services.ledger.open(&id.to_string(), budget)?;
        let mut ctx = ExecutionContext::new(id, record.goal.clone(), budget);
        ctx.progress.tasks_total = params.tasks_total;
        self.register(id, ctx, config);

        if !params.agent_ids.is_empty() {
            fail_open(
                "form_initial_team",
                self.services.team.form_team(&id, &params.agent_ids),
            )
            .await;
        }

        self.services.bus.publish(
            topics::SWARM_CREATED,
            json!({ "swarm_id": id, "name": record.name, "goal": record.goal }),
        );
        info!("Created swarm {} ({})", id, record.name);

        if let Err(e) = self.start(&id).await {
            self.live.lock().remove(&id);
            self.transitions.lock().remove(&id);
            self.services.ledger.close(&id.to_string());
            return Err(e);
        }
        Ok(id)
    }

    /// Ensure a context exists and the OODA loop is scheduled
    pub async fn start(&self, id: &SwarmId) -> Result<()> {
        let (_guard, record) = self.lock_swarm(id).await?;
        if record.state.is_terminal() {
            return Err(FlockError::InvalidTransition {
                from: record.state.to_string(),
                event: LifecycleEvent::Start.to_string(),
            });
        }
        self.ensure_context(&record);

        let event = match record.state {
            SwarmState::Planning | SwarmState::Executing => {
                self.schedule(id, &record.config);
                return Ok(());
            }
            SwarmState::Suspended { .. } => LifecycleEvent::Resume,
            _ => LifecycleEvent::Start,
        };
        self.apply_locked(id, record, event).await?;
        Ok(())
    }

    pub async fn pause(&self, id: &SwarmId) -> Result<SwarmState> {
        self.apply(
            id,
            LifecycleEvent::Pause {
                reason: SuspendReason::Manual,
            },
        )
        .await
    }

    pub async fn resume(&self, id: &SwarmId) -> Result<SwarmState> {
        let (_guard, record) = self.lock_swarm(id).await?;
        if record.state.is_suspended() {
            self.ensure_context(&record);
        }
        self.apply_locked(id, record, LifecycleEvent::Resume).await
    }

    /// Natural end: `Completed`
    pub async fn stop(&self, id: &SwarmId) -> Result<SwarmState> {
        self.apply(id, LifecycleEvent::Complete).await
    }

    /// Forced end: `Terminated` with reason `forced_termination`
    pub async fn terminate_swarm(&self, id: &SwarmId) -> Result<SwarmState> {
        self.apply(
            id,
            LifecycleEvent::Terminate {
                reason: FORCED_TERMINATION.to_string(),
            },
        )
        .await
    }

    /// Apply a progress update, stopping the swarm once its goal is reached
    pub async fn update_progress(&self, id: &SwarmId, update: &ProgressUpdate) -> Result<Progress> {
        let (context, config) = self
            .live_context(id)
            .ok_or_else(|| FlockError::SwarmNotFound(id.to_string()))?;

        let progress = {
            let mut ctx = context.lock().await;
            ctx.apply_progress(update);
            ctx.progress.clone()
        };

        if progress.goal_reached(config.completion_ratio) {
            info!(
                "Swarm {} reached its goal ({}/{} tasks)",
                id, progress.tasks_completed, progress.tasks_total
            );
            self.stop(id).await?;
        }
        Ok(progress)
    }

    /// Persisted lifecycle state
    pub async fn state(&self, id: &SwarmId) -> Result<SwarmState> {
        Ok(self.record(id).await?.state)
    }

    /// Snapshot of a live swarm's context
    pub async fn context(&self, id: &SwarmId) -> Option<ExecutionContext> {
        let (context, _) = self.live_context(id)?;
        let ctx = context.lock().await;
        Some(ctx.clone())
    }

    pub fn is_live(&self, id: &SwarmId) -> bool {
        self.live.lock().contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_scheduled(&self, id: &SwarmId) -> bool {
        self.scheduler.is_scheduled(id)
    }

    /// Run one tick now, outside the schedule
    pub async fn run_tick(&self, id: &SwarmId) -> Result<TickControl> {
        self.tick(*id, &CancellationToken::new()).await
    }

    async fn tick(&self, id: SwarmId, cancel: &CancellationToken) -> Result<TickControl> {
        let record = match self.services.store.get_swarm(&id).await? {
            Some(record) => record,
            None => {
                debug!("Swarm {} vanished from the store; stopping its loop", id);
                return Ok(TickControl::Stop);
            }
        };

        match record.state {
            SwarmState::Planning => {
                self.apply(&id, LifecycleEvent::BeginExecution).await?;
            }
            SwarmState::Executing => {}
            _ => {
                debug!("Swarm {} is {}; stopping its loop", id, record.state);
                return Ok(TickControl::Stop);
            }
        }

        // A context released by a concurrent stop is never rebuilt here
        let Some((context, config)) = self.live_context(&id) else {
            return Ok(TickControl::Stop);
        };
        let live_swarms = self.live_count();

        let (report, goal_reached): (TickReport, bool) = {
            let mut ctx = context.lock().await;
            let report = self.driver.run_tick(&mut ctx, &config, live_swarms, cancel).await?;
            (report, ctx.progress.goal_reached(config.completion_ratio))
        };

        if report.cancelled || cancel.is_cancelled() {
            return Ok(TickControl::Stop);
        }

        if goal_reached {
            info!("Swarm {} reached its goal after tick {}", id, report.tick);
            self.stop(&id).await?;
            return Ok(TickControl::Stop);
        }

        if report.resource_alert {
            self.apply(
                &id,
                LifecycleEvent::Pause {
                    reason: SuspendReason::ResourceAlert,
                },
            )
            .await?;
            return Ok(TickControl::Stop);
        }

        Ok(TickControl::Continue)
    }

    /// Run a lifecycle transition and its side effects
    async fn apply(&self, id: &SwarmId, event: LifecycleEvent) -> Result<SwarmState> {
        let (_guard, record) = self.lock_swarm(id).await?;
        self.apply_locked(id, record, event).await
    }

    /// `apply` for a caller already holding the swarm's transition lock
    async fn apply_locked(
        &self,
        id: &SwarmId,
        record: SwarmRecord,
        event: LifecycleEvent,
    ) -> Result<SwarmState> {
        let (next, actions) = transition(&record.state, event)?;
        self.services.store.update_swarm_state(id, &next).await?;
        debug!("Swarm {}: {} -> {}", id, record.state, next);

        let mut summary = None;
        for action in actions {
            match action {
                LifecycleAction::ScheduleLoop => self.schedule(id, &record.config),
                LifecycleAction::CancelLoop => {
                    self.scheduler.cancel(id);
                }
                LifecycleAction::ReleaseContext => summary = self.release(id).await,
                LifecycleAction::Publish { topic } => self.services.bus.publish(
                    topic,
                    json!({ "swarm_id": id, "state": next, "summary": summary }),
                ),
            }
        }

        self.services.bus.publish(
            topics::SWARM_STATE_CHANGED,
            json!({ "swarm_id": id, "from": record.state, "to": next }),
        );
        Ok(next)
    }

    /// Drop the live context and close its ledger account
    async fn release(&self, id: &SwarmId) -> Option<SwarmSummary> {
        let live = self.live.lock().remove(id);
        self.transitions.lock().remove(id);
        let resources = self.services.ledger.close(&id.to_string());
        fail_open("disband_team", self.services.team.disband_team(id)).await;

        let live = live?;
        let ctx = live.context.lock().await;
        Some(SwarmSummary::from_context(&ctx, resources))
    }

    /// Take the swarm's transition lock and read its record under it
    async fn lock_swarm(&self, id: &SwarmId) -> Result<(OwnedMutexGuard<()>, SwarmRecord)> {
        let lock = self.transitions.lock().entry(*id).or_default().clone();
        let guard = lock.lock_owned().await;
        match self.record(id).await {
            Ok(record) => Ok((guard, record)),
            Err(e) => {
                if matches!(e, FlockError::SwarmNotFound(_)) {
                    self.transitions.lock().remove(id);
                }
                Err(e)
            }
        }
    }

    fn schedule(&self, id: &SwarmId, config: &SwarmConfig) {
        self.scheduler.schedule(
            *id,
            Duration::from_millis(config.adaptation_interval_ms),
            Arc::new(ManagerTicks(self.me.clone())),
        );
    }

    fn register(&self, id: SwarmId, ctx: ExecutionContext, config: SwarmConfig) {
        self.live.lock().insert(
            id,
            LiveSwarm {
                context: Arc::new(tokio::sync::Mutex::new(ctx)),
                config,
            },
        );
    }

    fn live_context(
        &self,
        id: &SwarmId,
    ) -> Option<(Arc<tokio::sync::Mutex<ExecutionContext>>, SwarmConfig)> {
        self.live
            .lock()
            .get(id)
            .map(|l| (l.context.clone(), l.config.clone()))
    }

    /// Return the live context, rebuilding a minimal one from the record if missing
    fn ensure_context(
        &self,
        record: &SwarmRecord,
    ) -> (Arc<tokio::sync::Mutex<ExecutionContext>>, SwarmConfig) {
        let mut live = self.live.lock();
        let entry = live.entry(record.id).or_insert_with(|| {
            info!("Rehydrating context for swarm {}", record.id);
            let budget = self.config.budget_for(&record.config);
            let context_id = record.id.to_string();
            if !self.services.ledger.contains(&context_id) {
                if let Err(e) = self.services.ledger.open(&context_id, budget) {
                    warn!("Failed to reopen ledger account {}: {}", context_id, e);
                }
            }
            LiveSwarm {
                context: Arc::new(tokio::sync::Mutex::new(ExecutionContext::new(
                    record.id,
                    record.goal.clone(),
                    budget,
                ))),
                config: record.config.clone(),
            }
        });
        (entry.context.clone(), entry.config.clone())
    }

    async fn record(&self, id: &SwarmId) -> Result<SwarmRecord> {
        self.services
            .store
            .get_swarm(id)
            .await?
            .ok_or_else(|| FlockError::SwarmNotFound(id.to_string()))
    }

    /// Consume `agent.report` and `run.completed` from the bus
    pub fn spawn_event_listener(&self) -> JoinHandle<()> {
        let mut reports = self.services.bus.subscribe(topics::AGENT_REPORT);
        let mut runs = self.services.bus.subscribe(topics::RUN_COMPLETED);
        let shutdown = self.shutdown.clone();
        let me = self.me.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = reports.recv() => event,
                    event = runs.recv() => event,
                };
                let Some(event) = event else { break };
                let Some(manager) = me.upgrade() else { break };

                if let Err(e) = manager.handle_event(&event).await {
                    warn!("Failed to handle {} event: {}", event.topic, e);
                }
            }
            debug!("Swarm event listener stopped");
        })
    }

    async fn handle_event(&self, event: &BusEvent) -> Result<()> {
        let id = event
            .swarm_id()
            .ok_or_else(|| FlockError::Other(format!("{} event without swarm_id", event.topic)))?;

        match event.topic.as_str() {
            topics::AGENT_REPORT => {
                let agent_id = event
                    .payload
                    .get("agent_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| FlockError::Other("agent.report without agent_id".to_string()))?;
                let (context, _) = self
                    .live_context(&id)
                    .ok_or_else(|| FlockError::SwarmNotFound(id.to_string()))?;

                let mut ctx = context.lock().await;
                ctx.agent_reports.insert(
                    agent_id.to_string(),
                    AgentReport {
                        agent_id: agent_id.to_string(),
                        reported_at: event.published_at,
                        report: event.payload.get("report").cloned().unwrap_or_default(),
                    },
                );
                Ok(())
            }
            topics::RUN_COMPLETED => {
                let delta = event
                    .payload
                    .get("tasks_completed")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(1);
                self.update_progress(&id, &ProgressUpdate::completed(delta))
                    .await
                    .map(|_| ())
            }
            other => {
                debug!("Ignoring {} event", other);
                Ok(())
            }
        }
    }

    /// Stop the event listener and every schedule, waiting for running ticks
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.scheduler.shutdown().await;
        info!("Swarm manager shut down with {} live swarms", self.live_count());
    }
}
