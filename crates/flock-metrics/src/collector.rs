//! Telemetry collection for swarms

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flock_core::{
    DecisionOutcome, Monitor, PerformanceMetrics, Reflection, ReflectionInput, Result, SwarmId,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Failure share above which the monitor asks the strategy to slow down
const FAILURE_RATE_LIMIT: f64 = 0.5;

/// Remaining credit share below which the monitor asks for conservation
const LOW_CREDIT_SHARE: f64 = 0.25;

/// Types of telemetry events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TickEvent {
    /// A tick finished its Act phase
    TickCompleted {
        tick: u64,
        duration_ms: u64,
        executed: u64,
        failed: u64,
    },
    /// A decision failed during Act
    DecisionFailed { descriptor: String, reason: String },
    /// Custom event
    Custom {
        name: String,
        data: serde_json::Value,
    },
}

/// Collected telemetry for one swarm
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmMetrics {
    pub swarm_id: SwarmId,
    pub started_at: DateTime<Utc>,
    pub ticks: u64,
    pub decisions_executed: u64,
    pub decisions_failed: u64,
    pub total_tick_ms: u64,
    pub events: Vec<(DateTime<Utc>, TickEvent)>,
}

impl SwarmMetrics {
    pub fn new(swarm_id: SwarmId) -> Self {
        Self {
            swarm_id,
            started_at: Utc::now(),
            ticks: 0,
            decisions_executed: 0,
            decisions_failed: 0,
            total_tick_ms: 0,
            events: Vec::new(),
        }
    }

    pub fn record_event(&mut self, event: TickEvent) {
        if let TickEvent::TickCompleted {
            duration_ms,
            executed,
            failed,
            ..
        } = &event
        {
            self.ticks += 1;
            self.total_tick_ms += duration_ms;
            self.decisions_executed += executed;
            self.decisions_failed += failed;
        }

        self.events.push((Utc::now(), event));
    }

    /// Share of attempted decisions that executed
    pub fn success_rate(&self) -> f64 {
        let attempted = self.decisions_executed + self.decisions_failed;
        if attempted == 0 {
            return 1.0;
        }
        self.decisions_executed as f64 / attempted as f64
    }

    pub fn average_tick_ms(&self) -> f64 {
        if self.ticks == 0 {
            return 0.0;
        }
        self.total_tick_ms as f64 / self.ticks as f64
    }

    pub fn to_performance(&self) -> PerformanceMetrics {
        PerformanceMetrics {
            ticks: self.ticks,
            decisions_executed: self.decisions_executed,
            decisions_failed: self.decisions_failed,
            success_rate: self.success_rate(),
            average_tick_ms: self.average_tick_ms(),
        }
    }
}

/// Metrics collector for all swarms in the process
pub struct MetricsCollector {
    swarms: Arc<RwLock<HashMap<SwarmId, SwarmMetrics>>>,
    total_ticks: AtomicU64,
    total_executed: AtomicU64,
    total_failed: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            swarms: Arc::new(RwLock::new(HashMap::new())),
            total_ticks: AtomicU64::new(0),
            total_executed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
        }
    }

    /// Record an event for a swarm, tracking it if unseen
    pub async fn record(&self, swarm_id: &SwarmId, event: TickEvent) {
        if let TickEvent::TickCompleted {
            executed, failed, ..
        } = &event
        {
            self.total_ticks.fetch_add(1, Ordering::Relaxed);
            self.total_executed.fetch_add(*executed, Ordering::Relaxed);
            self.total_failed.fetch_add(*failed, Ordering::Relaxed);
        }

        let mut swarms = self.swarms.write().await;
        swarms
            .entry(*swarm_id)
            .or_insert_with(|| SwarmMetrics::new(*swarm_id))
            .record_event(event);
    }

    pub async fn get_swarm_metrics(&self, swarm_id: &SwarmId) -> Option<SwarmMetrics> {
        self.swarms.read().await.get(swarm_id).cloned()
    }

    /// Stop tracking a swarm, returning what was collected
    pub async fn forget(&self, swarm_id: &SwarmId) -> Option<SwarmMetrics> {
        self.swarms.write().await.remove(swarm_id)
    }

    pub fn global_summary(&self) -> GlobalMetrics {
        GlobalMetrics {
            total_ticks: self.total_ticks.load(Ordering::Relaxed),
            total_executed: self.total_executed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Monitor for MetricsCollector {
    async fn get_performance_metrics(&self, swarm_id: &SwarmId) -> Result<Option<PerformanceMetrics>> {
        Ok(self
            .get_swarm_metrics(swarm_id)
            .await
            .map(|m| m.to_performance()))
    }

    async fn analyze_performance(&self, input: &ReflectionInput) -> Result<Option<Reflection>> {
        let mut learnings = Vec::new();
        let mut executed = 0;
        let mut failed = 0;

        for decision in &input.decisions {
            match &decision.outcome {
                Some(DecisionOutcome::Executed) => executed += 1,
                Some(DecisionOutcome::Failed(reason)) => {
                    failed += 1;
                    learnings.push(format!("{} failed: {}", decision.descriptor(), reason));
                    self.record(
                        &input.swarm_id,
                        TickEvent::DecisionFailed {
                            descriptor: decision.descriptor(),
                            reason: reason.clone(),
                        },
                    )
                    .await;
                }
                None => {}
            }
        }

        self.record(
            &input.swarm_id,
            TickEvent::TickCompleted {
                tick: input.tick,
                duration_ms: input.tick_duration_ms,
                executed,
                failed,
            },
        )
        .await;

        if input.decisions.is_empty() {
            return Ok(None);
        }

        if executed > 0 {
            learnings.push(format!(
                "Tick {} executed {} of {} decisions",
                input.tick,
                executed,
                input.decisions.len()
            ));
        }

        let mut adaptations = Vec::new();
        let attempted = executed + failed;
        if attempted > 1 && failed as f64 / attempted as f64 > FAILURE_RATE_LIMIT {
            adaptations.push("reduce_batch_size".to_string());
        }

        let total = input.resources.total.credits;
        if total > 0 {
            let remaining = input.resources.remaining().credits;
            if (remaining as f64) < total as f64 * LOW_CREDIT_SHARE {
                adaptations.push("conserve_resources".to_string());
            }
        }

        let performance_metrics = self
            .get_swarm_metrics(&input.swarm_id)
            .await
            .map(|m| m.to_performance());

        debug!(
            "Reflection for swarm {} tick {}: {} learnings, {} adaptations",
            input.swarm_id,
            input.tick,
            learnings.len(),
            adaptations.len()
        );

        Ok(Some(Reflection {
            learnings,
            adaptations,
            performance_metrics,
        }))
    }
}

/// Process-wide metrics summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalMetrics {
    pub total_ticks: u64,
    pub total_executed: u64,
    pub total_failed: u64,
}

impl GlobalMetrics {
    pub fn success_rate(&self) -> f64 {
        let attempted = self.total_executed + self.total_failed;
        if attempted == 0 {
            return 1.0;
        }
        self.total_executed as f64 / attempted as f64
    }
}
