//! Default budget-aware strategy
//!
//! Proposes one `execute_routine` per pending task, limited by a per-swarm
//! batch size and by the credits left. Reflection directives shrink the batch
//! or cheapen routines.

use async_trait::async_trait;
use flock_core::{
    DecisionEngine, DecisionInput, DecisionKind, ProposedDecision, Result, SituationAnalysis,
    SituationInput, SwarmId,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use tracing::info;

/// Remaining credit share below which low credits are reported as a threat
const LOW_CREDIT_SHARE: f64 = 0.25;

#[derive(Debug, Clone)]
struct StrategyState {
    batch_size: usize,
    conserve: bool,
    directives: Vec<String>,
}

/// Strategy that spends the budget on pending tasks
pub struct BudgetedEngine {
    routine_cost: u64,
    batch_size: usize,
    swarms: Mutex<HashMap<SwarmId, StrategyState>>,
}

impl BudgetedEngine {
    pub fn new(routine_cost: u64) -> Self {
        Self {
            routine_cost: routine_cost.max(1),
            batch_size: 1,
            swarms: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn state(&self, swarm_id: &SwarmId) -> StrategyState {
        self.swarms
            .lock()
            .get(swarm_id)
            .cloned()
            .unwrap_or(StrategyState {
                batch_size: self.batch_size,
                conserve: false,
                directives: Vec::new(),
            })
    }

    /// Directives applied to a swarm so far
    pub fn directives(&self, swarm_id: &SwarmId) -> Vec<String> {
        self.state(swarm_id).directives
    }

    fn cost(&self, state: &StrategyState) -> u64 {
        if state.conserve {
            (self.routine_cost / 2).max(1)
        } else {
            self.routine_cost
        }
    }
}

fn pending_tasks(completed: u64, total: u64) -> u64 {
    if total == 0 {
        // No estimate yet: keep one task in flight until the first completes
        u64::from(completed == 0)
    } else {
        total.saturating_sub(completed)
    }
}

#[async_trait]
impl DecisionEngine for BudgetedEngine {
    async fn analyze_situation(&self, input: &SituationInput) -> Result<Option<SituationAnalysis>> {
        let progress = &input.progress;
        let pending = pending_tasks(progress.tasks_completed, progress.tasks_total);
        let mut analysis = SituationAnalysis {
            assessment: vec![format!(
                "{}/{} tasks complete",
                progress.tasks_completed, progress.tasks_total
            )],
            ..Default::default()
        };

        if let Some(resources) = &input.observation.resources {
            let remaining = resources.remaining.credits;
            analysis
                .assessment
                .push(format!("{} credits remaining", remaining));
            analysis
                .facts
                .insert("credits_remaining".to_string(), json!(remaining));

            let initial = resources.initial.credits;
            if initial > 0 && (remaining as f64) < initial as f64 * LOW_CREDIT_SHARE {
                analysis.threats.push("low_credits".to_string());
            }

            let cost = self.cost(&self.state(&input.swarm_id));
            let affordable = remaining / cost;
            if affordable > 0 && pending > 0 {
                analysis
                    .opportunities
                    .push(format!("budget covers {} more routines", affordable));
            }
        }

        for (agent_id, report) in &input.observation.agent_reports {
            if report.is_none() {
                analysis.threats.push(format!("no report from {}", agent_id));
            }
        }

        if pending > 0 {
            analysis
                .recommendations
                .push("execute_pending_tasks".to_string());
        }

        analysis
            .facts
            .insert("tick".to_string(), json!(input.observation.environment.tick));

        Ok(Some(analysis))
    }

    async fn generate_decisions(&self, input: &DecisionInput) -> Result<Vec<ProposedDecision>> {
        let state = self.state(&input.swarm_id);
        let progress = &input.progress;
        let pending = pending_tasks(progress.tasks_completed, progress.tasks_total);
        if pending == 0 {
            return Ok(Vec::new());
        }

        let cost = self.cost(&state);
        let affordable = input.remaining.credits / cost;
        if affordable == 0 {
            if input.config.resource_optimization && !state.conserve {
                return Ok(vec![ProposedDecision::new(
                    DecisionKind::AdaptStrategy {
                        directive: "conserve_resources".to_string(),
                    },
                    "Remaining credits cannot cover a routine",
                )]);
            }
            return Ok(Vec::new());
        }

        let count = pending.min(affordable).min(state.batch_size as u64);
        Ok((0..count)
            .map(|i| {
                let task = progress.tasks_completed + i + 1;
                ProposedDecision::new(
                    DecisionKind::ExecuteRoutine {
                        routine_id: format!("task-{}", task),
                        params: json!({ "credits": cost, "goal": input.goal }),
                    },
                    format!("{} tasks pending toward the goal", pending),
                )
            })
            .collect())
    }

    async fn adapt_strategy(&self, swarm_id: &SwarmId, directive: &str) -> Result<()> {
        let mut swarms = self.swarms.lock();
        let state = swarms.entry(*swarm_id).or_insert_with(|| StrategyState {
            batch_size: self.batch_size,
            conserve: false,
            directives: Vec::new(),
        });

        match directive {
            "reduce_batch_size" => state.batch_size = (state.batch_size / 2).max(1),
            "conserve_resources" => state.conserve = true,
            _ => {}
        }
        state.directives.push(directive.to_string());

        info!("Swarm {} strategy adapted: {}", swarm_id, directive);
        Ok(())
    }
}
