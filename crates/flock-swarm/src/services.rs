//! Collaborators shared by the lifecycle manager and the OODA driver

use flock_core::{
    DecisionEngine, EventBus, Monitor, ResourceStatusProvider, SwarmStore, TeamRegistry,
    TierExecutor,
};
use flock_ledger::ResourceLedger;
use flock_metrics::MetricsCollector;
use flock_team::InMemoryTeamRegistry;
use std::sync::Arc;

use crate::event_bus::InMemoryEventBus;
use crate::store::InMemorySwarmStore;

/// Handles to every collaborator a swarm needs
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn SwarmStore>,
    pub bus: Arc<dyn EventBus>,
    pub engine: Arc<dyn DecisionEngine>,
    pub team: Arc<dyn TeamRegistry>,
    pub monitor: Arc<dyn Monitor>,
    pub ledger: Arc<ResourceLedger>,
    /// Read side of the ledger used during Observe
    pub resources: Arc<dyn ResourceStatusProvider>,
    /// Tier that `execute_routine` decisions are delegated to
    pub subordinate: Option<Arc<dyn TierExecutor>>,
}

impl Services {
    /// In-process collaborators around the given strategy
    pub fn in_memory(engine: Arc<dyn DecisionEngine>) -> Self {
        let ledger = Arc::new(ResourceLedger::new());
        Self {
            store: Arc::new(InMemorySwarmStore::new()),
            bus: Arc::new(InMemoryEventBus::default()),
            engine,
            team: Arc::new(InMemoryTeamRegistry::default()),
            monitor: Arc::new(MetricsCollector::new()),
            resources: ledger.clone(),
            ledger,
            subordinate: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SwarmStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_team(mut self, team: Arc<dyn TeamRegistry>) -> Self {
        self.team = team;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_subordinate(mut self, tier: Arc<dyn TierExecutor>) -> Self {
        self.subordinate = Some(tier);
        self
    }
}
