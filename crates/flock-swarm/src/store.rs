//! In-process swarm store

use async_trait::async_trait;
use chrono::Utc;
use flock_core::{FlockError, Result, SwarmId, SwarmRecord, SwarmState, SwarmStore};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Swarm store keeping records in memory for the life of the process
#[derive(Default)]
pub struct InMemorySwarmStore {
    records: RwLock<HashMap<SwarmId, SwarmRecord>>,
}

impl InMemorySwarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records, oldest first
    pub async fn list(&self) -> Vec<SwarmRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }
}

#[async_trait]
impl SwarmStore for InMemorySwarmStore {
    async fn create_swarm(&self, record: &SwarmRecord) -> Result<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(FlockError::Store(format!(
                "Swarm {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        debug!("Stored swarm {} ({})", record.id, record.name);
        Ok(())
    }

    async fn get_swarm(&self, id: &SwarmId) -> Result<Option<SwarmRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn update_swarm_state(&self, id: &SwarmId, state: &SwarmState) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| FlockError::SwarmNotFound(id.to_string()))?;
        record.state = state.clone();
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flock_core::SwarmConfig;
    use std::collections::BTreeMap;

    fn record() -> SwarmRecord {
        let now = Utc::now();
        SwarmRecord {
            id: SwarmId::new(),
            name: "test".to_string(),
            description: String::new(),
            goal: "ship it".to_string(),
            state: SwarmState::Forming,
            config: SwarmConfig::default(),
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_create_and_update() {
        let store = InMemorySwarmStore::new();
        let record = record();
        store.create_swarm(&record).await.unwrap();

        store
            .update_swarm_state(&record.id, &SwarmState::Planning)
            .await
            .unwrap();
        let stored = store.get_swarm(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.state, SwarmState::Planning);
        assert!(stored.updated_at >= record.updated_at);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing() {
        let store = InMemorySwarmStore::new();
        let record = record();
        store.create_swarm(&record).await.unwrap();
        assert!(store.create_swarm(&record).await.is_err());

        let err = store
            .update_swarm_state(&SwarmId::new(), &SwarmState::Completed)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_swarm(&SwarmId::new()).await.unwrap().is_none());
    }
}
