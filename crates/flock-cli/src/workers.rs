//! Local stand-in for the worker tier
//!
//! Runs each routine in-process: waits briefly, then reports a share of the
//! credit ceiling as used.

use async_trait::async_trait;
use flock_core::tier::LatencyEstimates;
use flock_core::{
    ExecutionStatus, FlockError, ResourceAmounts, ResourcesUsed, Result, TierCapabilities,
    TierExecutionRecord, TierExecutor, TierRequest, TierResult,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

const WORK_MS: u64 = 20;

/// Percentage of the credit ceiling a routine reports as used
const USAGE_PERCENT: u64 = 60;

#[derive(Default)]
pub struct LocalWorkers {
    records: Mutex<HashMap<String, TierExecutionRecord>>,
}

impl LocalWorkers {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TierExecutor for LocalWorkers {
    async fn execute(&self, request: TierRequest) -> TierResult {
        let started = Instant::now();
        self.records.lock().insert(
            request.execution_id.clone(),
            TierExecutionRecord::running(&request.execution_id),
        );

        tokio::time::sleep(Duration::from_millis(WORK_MS)).await;

        let routine = request
            .input
            .get("routine_id")
            .and_then(|v| v.as_str())
            .unwrap_or("routine");
        let credits = request.allocation.credits * USAGE_PERCENT / 100;
        debug!("Worker finished {} using {} credits", routine, credits);

        let status = match self.records.lock().get_mut(&request.execution_id) {
            Some(record) => {
                record.finish(ExecutionStatus::Completed);
                record.status
            }
            None => ExecutionStatus::Completed,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if status == ExecutionStatus::Cancelled {
            return TierResult::failure(
                request.execution_id,
                flock_core::TierError::new("CANCELLED", "routine cancelled", "workers"),
                duration_ms,
            );
        }

        TierResult::success(
            request.execution_id,
            serde_json::json!({ "routine_id": routine, "status": "done" }),
            ResourcesUsed {
                credits,
                tokens: credits * 10,
                duration_ms,
                memory_mb: 0,
                steps: 1,
            },
            duration_ms,
            1.0,
        )
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<()> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(execution_id)
            .ok_or_else(|| FlockError::ExecutionNotFound(execution_id.to_string()))?;
        record.finish(ExecutionStatus::Cancelled);
        Ok(())
    }

    async fn get_execution_status(&self, execution_id: &str) -> ExecutionStatus {
        self.records
            .lock()
            .get(execution_id)
            .map(|r| r.status)
            .unwrap_or(ExecutionStatus::Completed)
    }

    fn get_capabilities(&self) -> TierCapabilities {
        TierCapabilities {
            tier: "workers".to_string(),
            input_kinds: vec!["routine".to_string()],
            strategies: vec!["local".to_string()],
            max_concurrency: 1,
            latency: LatencyEstimates {
                p50_ms: WORK_MS,
                p95_ms: WORK_MS * 2,
                p99_ms: WORK_MS * 3,
            },
            resource_limits: ResourceAmounts::default(),
        }
    }
}
