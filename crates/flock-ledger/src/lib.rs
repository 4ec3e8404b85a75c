//! # flock-ledger
//!
//! Resource ledger for Flock swarms.
//!
//! Tracks credits, tokens and time per execution context with atomic
//! reserve, rollback and settle. The ledger doubles as the resource status
//! provider consulted by the OODA Observe phase.

mod ledger;

pub use ledger::{Reservation, ResourceLedger};

use async_trait::async_trait;
use flock_core::{ResourceStatus, ResourceStatusProvider, Result, SwarmId};

#[async_trait]
impl ResourceStatusProvider for ResourceLedger {
    async fn get_resource_status(&self, swarm_id: &SwarmId) -> Result<Option<ResourceStatus>> {
        match self.snapshot(&swarm_id.to_string()) {
            Ok(status) => Ok(Some(status)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
