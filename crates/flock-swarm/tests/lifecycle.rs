//! Lifecycle manager integration tests

mod common;

use common::{
    budgeted_manager, fast_config, next_event, queued_manager, routine_started, QueuedEngine,
    SimulatedTier,
};
use flock_core::{
    topics, EventBus, FlockConfig, FlockError, ResourceAmounts, Result, SuspendReason,
    SwarmConfig, SwarmId, SwarmRecord, SwarmState, SwarmStore,
};
use flock_swarm::{BudgetedEngine, CreateSwarmParams, Services, SwarmManager, SwarmSummary};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[tokio::test]
async fn test_swarm_runs_until_goal_reached() {
    let manager = budgeted_manager(100, 40);
    let mut lifecycle = manager.services().bus.subscribe(topics::SWARM_LIFECYCLE);

    let id = manager
        .create_swarm(
            CreateSwarmParams::new("indexer", "index the docs")
                .with_config(fast_config(10))
                .with_budget(ResourceAmounts::credits(5000))
                .with_tasks_total(3),
        )
        .await
        .unwrap();

    let stopped = next_event(&mut lifecycle, topics::SWARM_STOPPED, id).await;
    let summary: SwarmSummary =
        serde_json::from_value(stopped.payload["summary"].clone()).unwrap();

    assert_eq!(manager.state(&id).await.unwrap(), SwarmState::Completed);
    assert_eq!(summary.progress.tasks_completed, 3);
    assert_eq!(summary.decisions_executed, 3);
    assert_eq!(summary.decisions_failed, 0);

    // Each routine reserved 100 and settled to the 40 actually used
    let resources = summary.resources.unwrap();
    assert_eq!(resources.consumed.credits, 120);
    assert_eq!(resources.remaining.credits, 4880);

    assert!(!manager.is_live(&id));
    assert!(!manager.is_scheduled(&id));
    assert!(!manager.services().ledger.contains(&id.to_string()));
}

#[tokio::test]
async fn test_zero_task_estimate_completes_after_first_task() {
    let manager = budgeted_manager(100, 10);
    let mut lifecycle = manager.services().bus.subscribe(topics::SWARM_LIFECYCLE);

    let id = manager
        .create_swarm(CreateSwarmParams::new("one-shot", "ping").with_config(fast_config(10)))
        .await
        .unwrap();

    let stopped = next_event(&mut lifecycle, topics::SWARM_STOPPED, id).await;
    assert_eq!(stopped.payload["summary"]["progress"]["tasks_completed"], 1);
    assert_eq!(manager.state(&id).await.unwrap(), SwarmState::Completed);
}

#[tokio::test]
async fn test_created_swarm_is_planning_and_scheduled() {
    let manager = budgeted_manager(100, 10);
    let id = manager
        .create_swarm(CreateSwarmParams::new("slow", "wait").with_tasks_total(10))
        .await
        .unwrap();

    assert_eq!(manager.state(&id).await.unwrap(), SwarmState::Planning);
    assert!(manager.is_scheduled(&id));
    assert_eq!(manager.live_count(), 1);

    let ctx = manager.context(&id).await.unwrap();
    assert_eq!(ctx.progress.tasks_total, 10);
    assert_eq!(ctx.resources.total.credits, 10_000);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_pause_stops_ticks_and_resume_keeps_context() {
    let manager = budgeted_manager(10, 10);
    let id = manager
        .create_swarm(
            CreateSwarmParams::new("long", "grind")
                .with_config(fast_config(10))
                .with_tasks_total(10_000),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    let state = manager.pause(&id).await.unwrap();
    assert_eq!(
        state,
        SwarmState::Suspended {
            reason: SuspendReason::Manual
        }
    );
    assert!(!manager.is_scheduled(&id));

    // Let any tick that was mid-flight drain
    tokio::time::sleep(Duration::from_millis(30)).await;
    let paused = manager.context(&id).await.unwrap();
    let consumed = manager
        .services()
        .ledger
        .snapshot(&id.to_string())
        .unwrap()
        .consumed
        .credits;
    assert!(paused.ticks > 0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(manager.context(&id).await.unwrap().ticks, paused.ticks);

    assert_eq!(manager.resume(&id).await.unwrap(), SwarmState::Executing);
    assert!(manager.is_scheduled(&id));
    tokio::time::sleep(Duration::from_millis(80)).await;

    let resumed = manager.context(&id).await.unwrap();
    assert!(resumed.ticks > paused.ticks);
    assert!(resumed.knowledge.decisions.len() > paused.knowledge.decisions.len());
    assert_eq!(
        resumed.knowledge.decisions[..paused.knowledge.decisions.len()],
        paused.knowledge.decisions[..]
    );
    let after = manager
        .services()
        .ledger
        .snapshot(&id.to_string())
        .unwrap()
        .consumed
        .credits;
    assert!(after > consumed);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_allocation_consumes_budget() {
    let engine = QueuedEngine::new(vec![vec!["allocate_resources(agent-1, 900)"]]);
    let manager = queued_manager(engine);
    let id = manager
        .create_swarm(
            CreateSwarmParams::new("alloc", "fund agent-1")
                .with_config(SwarmConfig::default().with_total_budget(5000))
                .with_tasks_total(5),
        )
        .await
        .unwrap();

    manager.run_tick(&id).await.unwrap();

    let status = manager.services().ledger.snapshot(&id.to_string()).unwrap();
    assert_eq!(status.consumed.credits, 900);
    assert_eq!(status.remaining.credits, 4100);

    let ctx = manager.context(&id).await.unwrap();
    assert_eq!(ctx.resources.allocations.get("agent-1"), Some(&900));
    assert_eq!(manager.state(&id).await.unwrap(), SwarmState::Executing);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_resource_alert_pauses_swarm() {
    let engine = QueuedEngine::new(vec![vec!["allocate_resources(960)"]]);
    let manager = queued_manager(engine);
    let mut alerts = manager.services().bus.subscribe(topics::RESOURCE_ALERT);
    let id = manager
        .create_swarm(
            CreateSwarmParams::new("spender", "spend")
                .with_config(SwarmConfig::default().with_total_budget(1000))
                .with_tasks_total(5),
        )
        .await
        .unwrap();

    manager.run_tick(&id).await.unwrap();
    assert_eq!(manager.state(&id).await.unwrap(), SwarmState::Executing);

    // The next Observe sees 40 of 1000 credits left
    manager.run_tick(&id).await.unwrap();
    let alert = next_event(&mut alerts, topics::RESOURCE_ALERT, id).await;
    assert_eq!(alert.payload["kind"], "credits");
    assert_eq!(
        manager.state(&id).await.unwrap(),
        SwarmState::Suspended {
            reason: SuspendReason::ResourceAlert
        }
    );
    assert!(!manager.is_scheduled(&id));

    // The suspended swarm keeps its context for a later resume
    assert!(manager.is_live(&id));
}

#[tokio::test]
async fn test_terminate_releases_everything() {
    let manager = budgeted_manager(100, 10);
    let mut lifecycle = manager.services().bus.subscribe(topics::SWARM_LIFECYCLE);
    let id = manager
        .create_swarm(CreateSwarmParams::new("doomed", "nothing").with_tasks_total(10))
        .await
        .unwrap();

    let state = manager.terminate_swarm(&id).await.unwrap();
    assert_eq!(
        state,
        SwarmState::Terminated {
            reason: "forced_termination".to_string()
        }
    );

    let terminated = next_event(&mut lifecycle, topics::SWARM_TERMINATED, id).await;
    assert_eq!(terminated.payload["summary"]["ticks"], 0);
    assert!(!manager.is_live(&id));
    assert!(!manager.is_scheduled(&id));
    assert!(!manager.services().ledger.contains(&id.to_string()));

    let err = manager.terminate_swarm(&id).await.unwrap_err();
    assert!(matches!(err, FlockError::InvalidTransition { .. }));
    assert!(manager.start(&id).await.is_err());
}

#[tokio::test]
async fn test_ended_swarm_cannot_be_revived() {
    let manager = budgeted_manager(100, 10);
    let params = |name: &str| {
        CreateSwarmParams::new(name, "nothing")
            .with_config(fast_config(60_000))
            .with_tasks_total(10)
    };

    let completed = manager.create_swarm(params("finished")).await.unwrap();
    manager.stop(&completed).await.unwrap();
    let terminated = manager.create_swarm(params("killed")).await.unwrap();
    manager.terminate_swarm(&terminated).await.unwrap();

    for id in [completed, terminated] {
        let err = manager.resume(&id).await.unwrap_err();
        assert!(matches!(err, FlockError::InvalidTransition { .. }));
        let err = manager.start(&id).await.unwrap_err();
        assert!(matches!(err, FlockError::InvalidTransition { .. }));

        assert!(!manager.is_live(&id));
        assert!(!manager.is_scheduled(&id));
        assert!(!manager.services().ledger.contains(&id.to_string()));
    }
    assert_eq!(manager.live_count(), 0);
    assert_eq!(manager.state(&completed).await.unwrap(), SwarmState::Completed);
}

#[tokio::test]
async fn test_terminating_one_swarm_does_not_block_others() {
    let tier = SimulatedTier::slow(10, Duration::from_secs(1));
    let services = Services::in_memory(Arc::new(BudgetedEngine::new(100)))
        .with_subordinate(tier.clone());
    let manager = SwarmManager::new(services, FlockConfig::default());

    let busy = manager
        .create_swarm(
            CreateSwarmParams::new("busy", "long routine")
                .with_config(fast_config(10))
                .with_budget(ResourceAmounts::credits(5000))
                .with_tasks_total(10),
        )
        .await
        .unwrap();

    // The busy swarm's tick is now parked inside the subordinate call
    routine_started(&tier).await;
    let terminating = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.terminate_swarm(&busy).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started = Instant::now();
    let other = manager
        .create_swarm(CreateSwarmParams::new("other", "idle").with_config(fast_config(60_000)))
        .await
        .unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(300),
        "create_swarm waited {:?} on another swarm",
        started.elapsed()
    );
    assert_eq!(manager.state(&other).await.unwrap(), SwarmState::Planning);
    manager.pause(&other).await.unwrap();

    let state = terminating.await.unwrap().unwrap();
    assert!(matches!(state, SwarmState::Terminated { .. }));
    assert!(!manager.is_live(&busy));
}

#[tokio::test]
async fn test_unknown_swarm() {
    let manager = budgeted_manager(100, 10);
    let id = SwarmId::new();

    assert!(manager.pause(&id).await.unwrap_err().is_not_found());
    assert!(manager.stop(&id).await.unwrap_err().is_not_found());
    assert!(manager.start(&id).await.unwrap_err().is_not_found());
    assert!(manager.context(&id).await.is_none());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let manager = budgeted_manager(100, 10);

    let mut config = SwarmConfig::default();
    config.max_agents = 2;
    let err = manager
        .create_swarm(
            CreateSwarmParams::new("crowded", "x")
                .with_config(config)
                .with_agents(vec!["a".into(), "b".into(), "c".into()]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlockError::InvalidConfig(_)));

    let err = manager
        .create_swarm(
            CreateSwarmParams::new("bad", "x")
                .with_config(SwarmConfig::default().with_consensus_threshold(1.5)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlockError::InvalidConfig(_)));
    assert_eq!(manager.live_count(), 0);
}

struct FailingStore;

#[async_trait::async_trait]
impl SwarmStore for FailingStore {
    async fn create_swarm(&self, _: &SwarmRecord) -> Result<()> {
        Err(FlockError::Store("disk full".to_string()))
    }

    async fn get_swarm(&self, _: &SwarmId) -> Result<Option<SwarmRecord>> {
        Ok(None)
    }

    async fn update_swarm_state(&self, id: &SwarmId, _: &SwarmState) -> Result<()> {
        Err(FlockError::SwarmNotFound(id.to_string()))
    }
}

#[tokio::test]
async fn test_store_failure_registers_nothing() {
    let services = Services::in_memory(QueuedEngine::new(vec![])).with_store(Arc::new(FailingStore));
    let manager = SwarmManager::new(services, FlockConfig::default());
    let mut created = manager.services().bus.subscribe(topics::SWARM_CREATED);

    let err = manager
        .create_swarm(CreateSwarmParams::new("ghost", "x"))
        .await
        .unwrap_err();

    assert!(matches!(err, FlockError::Store(_)));
    assert_eq!(manager.live_count(), 0);
    assert!(created.try_recv().is_none());
}

#[tokio::test]
async fn test_two_swarms_complete_concurrently() {
    let manager = budgeted_manager(50, 25);
    let mut lifecycle = manager.services().bus.subscribe(topics::SWARM_LIFECYCLE);

    let params = |name: &str| {
        CreateSwarmParams::new(name, "split work")
            .with_config(fast_config(10))
            .with_budget(ResourceAmounts::credits(1000))
            .with_tasks_total(2)
    };
    let (a, b) = tokio::join!(
        manager.create_swarm(params("left")),
        manager.create_swarm(params("right"))
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut remaining = vec![a, b];
    while !remaining.is_empty() {
        let event = tokio::time::timeout(Duration::from_secs(5), lifecycle.recv())
            .await
            .unwrap()
            .unwrap();
        if event.topic == topics::SWARM_STOPPED {
            let id = event.swarm_id().unwrap();
            remaining.retain(|r| *r != id);
            assert_eq!(event.payload["summary"]["resources"]["consumed"]["credits"], 50);
        }
    }

    assert_eq!(manager.state(&a).await.unwrap(), SwarmState::Completed);
    assert_eq!(manager.state(&b).await.unwrap(), SwarmState::Completed);
    assert_eq!(manager.live_count(), 0);
}

#[tokio::test]
async fn test_bus_events_drive_progress() {
    let manager = queued_manager(QueuedEngine::new(vec![]));
    let listener = manager.spawn_event_listener();
    let bus = manager.services().bus.clone();
    let mut lifecycle = bus.subscribe(topics::SWARM_LIFECYCLE);

    let id = manager
        .create_swarm(CreateSwarmParams::new("listener", "wait for runs").with_tasks_total(2))
        .await
        .unwrap();

    bus.publish(
        topics::AGENT_REPORT,
        serde_json::json!({ "swarm_id": id, "agent_id": "agent-7", "report": { "status": "busy" } }),
    );
    bus.publish(
        topics::RUN_COMPLETED,
        serde_json::json!({ "swarm_id": id, "tasks_completed": 1 }),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;

    let ctx = manager.context(&id).await.unwrap();
    assert_eq!(ctx.agent_reports["agent-7"].report["status"], "busy");
    assert_eq!(ctx.progress.tasks_completed, 1);

    bus.publish(topics::RUN_COMPLETED, serde_json::json!({ "swarm_id": id }));
    next_event(&mut lifecycle, topics::SWARM_STOPPED, id).await;
    assert_eq!(manager.state(&id).await.unwrap(), SwarmState::Completed);

    manager.shutdown().await;
    tokio::time::timeout(Duration::from_secs(1), listener)
        .await
        .unwrap()
        .unwrap();
}
