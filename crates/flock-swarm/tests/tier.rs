//! Swarm tier facade tests

mod common;

use common::{routine_started, SimulatedTier};
use flock_core::{
    topics, EventBus, ExecutionOptions, ExecutionStatus, FlockConfig, FlockError,
    ResourceAmounts, SwarmState, TierExecutor, TierRequest,
};
use flock_swarm::{BudgetedEngine, InMemoryEventBus, Services, SwarmManager, SwarmTier};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn tier_with(config: FlockConfig, used_per_routine: u64) -> Arc<SwarmTier> {
    let services = Services::in_memory(Arc::new(BudgetedEngine::new(100)))
        .with_subordinate(SimulatedTier::new(used_per_routine));
    Arc::new(SwarmTier::new(SwarmManager::new(services, config)))
}

fn goal(tasks_total: u64, interval_ms: u64) -> serde_json::Value {
    json!({
        "goal": "summarize the corpus",
        "agents": ["agent-1", "agent-2"],
        "constraints": {
            "tasks_total": tasks_total,
            "adaptation_interval_ms": interval_ms,
        },
    })
}

#[tokio::test]
async fn test_execute_runs_swarm_to_completion() {
    let tier = tier_with(FlockConfig::default(), 30);

    let result = tier
        .execute(TierRequest::new(
            "exec-1",
            goal(2, 10),
            ResourceAmounts::credits(1000),
        ))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output["state"], "completed");
    assert_eq!(result.output["tasks_completed"], 2);
    assert_eq!(result.output["decisions"]["executed"], 2);
    assert_eq!(result.resources_used.credits, 60);
    assert_eq!(result.resources_used.steps, 2);
    assert_eq!(result.confidence, 1.0);

    assert_eq!(
        tier.get_execution_status("exec-1").await,
        ExecutionStatus::Completed
    );

    let swarm_id = result.output["swarm_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(
        tier.manager().state(&swarm_id).await.unwrap(),
        SwarmState::Completed
    );
}

#[tokio::test]
async fn test_invalid_input_fails() {
    let tier = tier_with(FlockConfig::default(), 30);

    let result = tier
        .execute(TierRequest::new(
            "exec-bad",
            json!({ "agents": "nobody" }),
            ResourceAmounts::default(),
        ))
        .await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, "INVALID_INPUT");
    assert_eq!(result.resources_used.credits, 0);
    assert_eq!(
        tier.get_execution_status("exec-bad").await,
        ExecutionStatus::Failed
    );
}

#[tokio::test]
async fn test_too_many_agents_fails_creation() {
    let tier = tier_with(FlockConfig::default(), 30);
    let agents: Vec<String> = (0..20).map(|i| format!("agent-{}", i)).collect();

    let result = tier
        .execute(TierRequest::new(
            "exec-crowd",
            json!({ "goal": "x", "agents": agents }),
            ResourceAmounts::credits(100),
        ))
        .await;

    let error = result.error.unwrap();
    assert_eq!(error.code, "SWARM_CREATE_FAILED");
    assert_eq!(error.tier, "swarm");
}

#[tokio::test]
async fn test_timeout_terminates_swarm() {
    let tier = tier_with(FlockConfig::default(), 30);

    let request = TierRequest::new("exec-slow", goal(1000, 60_000), ResourceAmounts::credits(1000))
        .with_options(ExecutionOptions {
            timeout_ms: Some(50),
            ..Default::default()
        });
    let result = tier.execute(request).await;

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, "TIMEOUT");
    assert_eq!(
        tier.get_execution_status("exec-slow").await,
        ExecutionStatus::Failed
    );
    assert_eq!(tier.manager().live_count(), 0);
}

#[tokio::test]
async fn test_cancel_mid_execution() {
    let subordinate = SimulatedTier::slow(30, Duration::from_millis(200));
    let services = Services::in_memory(Arc::new(BudgetedEngine::new(100)))
        .with_subordinate(subordinate.clone());
    let tier = Arc::new(SwarmTier::new(SwarmManager::new(
        services,
        FlockConfig::default(),
    )));
    let bus = tier.manager().services().bus.clone();
    let mut created = bus.subscribe(topics::SWARM_CREATED);

    let running = {
        let tier = tier.clone();
        tokio::spawn(async move {
            tier.execute(TierRequest::new(
                "exec-cancel",
                goal(1000, 20),
                ResourceAmounts::credits(1000),
            ))
            .await
        })
    };

    let event = tokio::time::timeout(Duration::from_secs(5), created.recv())
        .await
        .unwrap()
        .unwrap();
    let swarm_id = event.swarm_id().unwrap();

    // Cancel while a tick is parked in the subordinate call
    routine_started(&subordinate).await;
    assert_eq!(
        tier.get_execution_status("exec-cancel").await,
        ExecutionStatus::Running
    );
    tier.cancel_execution("exec-cancel").await.unwrap();

    // Nothing more is heard from the swarm across several intervals
    let mut lifecycle = bus.subscribe(topics::SWARM_LIFECYCLE);
    let late = tokio::time::timeout(Duration::from_millis(100), async {
        while let Some(event) = lifecycle.recv().await {
            if event.swarm_id() == Some(swarm_id) {
                return event;
            }
        }
        panic!("event bus closed");
    })
    .await;
    assert!(late.is_err(), "late event: {:?}", late.map(|e| e.topic));

    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error.unwrap().code, "CANCELLED");
    assert_eq!(
        tier.get_execution_status("exec-cancel").await,
        ExecutionStatus::Cancelled
    );
    assert!(matches!(
        tier.manager().state(&swarm_id).await.unwrap(),
        SwarmState::Terminated { .. }
    ));
    assert_eq!(tier.manager().live_count(), 0);
    assert!(!tier.manager().is_scheduled(&swarm_id));

    // Cancelling again is a no-op
    tier.cancel_execution("exec-cancel").await.unwrap();
}

#[tokio::test]
async fn test_execute_finishes_when_lifecycle_events_are_dropped() {
    let bus = Arc::new(InMemoryEventBus::new(2));
    let services = Services::in_memory(Arc::new(BudgetedEngine::new(100)))
        .with_bus(bus.clone())
        .with_subordinate(SimulatedTier::new(30));
    let tier = SwarmTier::new(SwarmManager::new(services, FlockConfig::default()));

    // Keep the tiny bus overflowing so the tier's subscription lags
    let noise = tokio::spawn(async move {
        loop {
            bus.publish("noise.tick", serde_json::json!({}));
            tokio::task::yield_now().await;
        }
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        tier.execute(TierRequest::new(
            "exec-lossy",
            goal(2, 10),
            ResourceAmounts::credits(1000),
        )),
    )
    .await
    .expect("execute never saw the swarm end");
    noise.abort();

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.output["state"], "completed");
    assert_eq!(
        tier.get_execution_status("exec-lossy").await,
        ExecutionStatus::Completed
    );
    let swarm_id = result.output["swarm_id"].as_str().unwrap().parse().unwrap();
    assert_eq!(
        tier.manager().state(&swarm_id).await.unwrap(),
        SwarmState::Completed
    );
}

#[tokio::test]
async fn test_capacity_and_duplicates() {
    let mut config = FlockConfig::default();
    config.tier.max_concurrency = 1;
    let tier = tier_with(config, 30);

    let running = {
        let tier = tier.clone();
        tokio::spawn(async move {
            tier.execute(TierRequest::new(
                "exec-a",
                goal(1000, 60_000),
                ResourceAmounts::credits(1000),
            ))
            .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let duplicate = tier
        .execute(TierRequest::new("exec-a", goal(1, 10), ResourceAmounts::default()))
        .await;
    assert_eq!(duplicate.error.unwrap().code, "DUPLICATE_EXECUTION");

    let rejected = tier
        .execute(TierRequest::new("exec-b", goal(1, 10), ResourceAmounts::default()))
        .await;
    assert_eq!(rejected.error.unwrap().code, "CAPACITY_EXCEEDED");

    tier.cancel_execution("exec-a").await.unwrap();
    running.await.unwrap();

    let admitted = tier
        .execute(TierRequest::new("exec-b", goal(1, 10), ResourceAmounts::credits(500)))
        .await;
    assert!(admitted.success, "{:?}", admitted.error);
}

#[tokio::test]
async fn test_unknown_execution() {
    let tier = tier_with(FlockConfig::default(), 30);

    let err = tier.cancel_execution("nope").await.unwrap_err();
    assert!(matches!(err, FlockError::ExecutionNotFound(_)));
    assert_eq!(
        tier.get_execution_status("nope").await,
        ExecutionStatus::Completed
    );
}

#[tokio::test]
async fn test_capabilities() {
    let tier = tier_with(FlockConfig::default(), 30);
    let caps = tier.get_capabilities();

    assert_eq!(caps.tier, "swarm");
    assert_eq!(caps.input_kinds, vec!["swarm_goal".to_string()]);
    assert!(caps.strategies.contains(&"ooda".to_string()));
    assert_eq!(caps.latency.p50_ms, 120_000);
    assert_eq!(caps.resource_limits.credits, 10_000);
}
