//! Shared fixtures for flock-swarm integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use flock_core::tier::LatencyEstimates;
use flock_core::{
    BusEvent, DecisionEngine, DecisionInput, ExecutionStatus, FlockConfig, ProposedDecision,
    ResourceAmounts, ResourcesUsed, Result, SituationAnalysis, SituationInput, Subscription,
    SwarmConfig, SwarmId, TierCapabilities, TierExecutor, TierRequest, TierResult,
};
use flock_swarm::{BudgetedEngine, Services, SwarmManager};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Subordinate tier that completes every routine with a fixed credit cost
pub struct SimulatedTier {
    pub credits: u64,
    pub calls: AtomicUsize,
    pub delay: Duration,
}

impl SimulatedTier {
    pub fn new(credits: u64) -> Arc<Self> {
        Self::slow(credits, Duration::ZERO)
    }

    /// Tier that holds every routine for `delay` before answering
    pub fn slow(credits: u64, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            credits,
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TierExecutor for SimulatedTier {
    async fn execute(&self, request: TierRequest) -> TierResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        TierResult::success(
            request.execution_id,
            serde_json::json!({ "ok": true }),
            ResourcesUsed {
                credits: self.credits,
                steps: 1,
                ..Default::default()
            },
            1,
            1.0,
        )
    }

    async fn cancel_execution(&self, _: &str) -> Result<()> {
        Ok(())
    }

    async fn get_execution_status(&self, _: &str) -> ExecutionStatus {
        ExecutionStatus::Completed
    }

    fn get_capabilities(&self) -> TierCapabilities {
        TierCapabilities {
            tier: "workers".to_string(),
            input_kinds: vec!["routine".to_string()],
            strategies: vec![],
            max_concurrency: 8,
            latency: LatencyEstimates::default(),
            resource_limits: ResourceAmounts::default(),
        }
    }
}

/// Strategy that proposes queued descriptors, one batch per tick
#[derive(Default)]
pub struct QueuedEngine {
    batches: Mutex<VecDeque<Vec<String>>>,
}

impl QueuedEngine {
    pub fn new(batches: Vec<Vec<&str>>) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(
                batches
                    .into_iter()
                    .map(|b| b.into_iter().map(String::from).collect())
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl DecisionEngine for QueuedEngine {
    async fn analyze_situation(&self, _: &SituationInput) -> Result<Option<SituationAnalysis>> {
        Ok(None)
    }

    async fn generate_decisions(&self, _: &DecisionInput) -> Result<Vec<ProposedDecision>> {
        let batch = self.batches.lock().pop_front().unwrap_or_default();
        Ok(batch
            .iter()
            .map(|d| ProposedDecision::new(d.as_str(), "queued"))
            .collect())
    }

    async fn adapt_strategy(&self, _: &SwarmId, _: &str) -> Result<()> {
        Ok(())
    }
}

pub fn fast_config(interval_ms: u64) -> SwarmConfig {
    SwarmConfig::default().with_adaptation_interval_ms(interval_ms)
}

/// Manager running the budgeted strategy against a simulated subordinate
pub fn budgeted_manager(routine_cost: u64, used_per_routine: u64) -> Arc<SwarmManager> {
    let services = Services::in_memory(Arc::new(BudgetedEngine::new(routine_cost)))
        .with_subordinate(SimulatedTier::new(used_per_routine));
    SwarmManager::new(services, FlockConfig::default())
}

pub fn queued_manager(engine: Arc<QueuedEngine>) -> Arc<SwarmManager> {
    SwarmManager::new(Services::in_memory(engine), FlockConfig::default())
}

/// Wait until `tier` has received at least one routine
pub async fn routine_started(tier: &SimulatedTier) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while tier.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no routine reached the subordinate tier");
}

/// Next event on `topic` for `swarm_id`, failing the test after five seconds
pub async fn next_event(sub: &mut Subscription, topic: &str, swarm_id: SwarmId) -> BusEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match sub.recv().await {
                Some(event) if event.topic == topic && event.swarm_id() == Some(swarm_id) => {
                    return event
                }
                Some(_) => {}
                None => panic!("event bus closed while waiting for {}", topic),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", topic))
}
