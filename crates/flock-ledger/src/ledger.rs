//! Per-context resource ledger
//!
//! Each execution context owns one account with three independent counters
//! (credits, tokens, time). Every counter keeps `consumed <= initial`, so
//! `remaining = initial - consumed` never goes negative.
//!
//! All bookkeeping happens under a single lock: a reservation checks every
//! requested kind first and only then applies, so a rejected call leaves the
//! counters exactly as they were. The work a reservation pays for runs
//! outside the lock.

use flock_core::{FlockError, ResourceAmounts, ResourceKind, ResourceStatus, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Handle to an applied reservation, used to roll it back or settle it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    id: Uuid,
    context_id: String,
    amounts: ResourceAmounts,
}

impl Reservation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn amounts(&self) -> ResourceAmounts {
        self.amounts
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counter {
    initial: u64,
    consumed: u64,
}

impl Counter {
    fn new(initial: u64) -> Self {
        Self {
            initial,
            consumed: 0,
        }
    }

    fn remaining(&self) -> u64 {
        self.initial - self.consumed
    }
}

#[derive(Debug)]
struct Account {
    credits: Counter,
    tokens: Counter,
    time: Counter,
    /// Reservations that can still be rolled back
    outstanding: HashMap<Uuid, ResourceAmounts>,
}

impl Account {
    fn new(budget: ResourceAmounts) -> Self {
        Self {
            credits: Counter::new(budget.credits),
            tokens: Counter::new(budget.tokens),
            time: Counter::new(budget.time_ms),
            outstanding: HashMap::new(),
        }
    }

    fn counter(&self, kind: ResourceKind) -> &Counter {
        match kind {
            ResourceKind::Credits => &self.credits,
            ResourceKind::Tokens => &self.tokens,
            ResourceKind::Time => &self.time,
        }
    }

    fn counter_mut(&mut self, kind: ResourceKind) -> &mut Counter {
        match kind {
            ResourceKind::Credits => &mut self.credits,
            ResourceKind::Tokens => &mut self.tokens,
            ResourceKind::Time => &mut self.time,
        }
    }

    /// Fail with the first kind that cannot cover `amounts`
    fn check(&self, amounts: &ResourceAmounts) -> Result<()> {
        for kind in ResourceKind::ALL {
            let requested = amounts.get(kind);
            let remaining = self.counter(kind).remaining();
            if requested > remaining {
                return Err(FlockError::BudgetExceeded {
                    kind,
                    requested,
                    remaining,
                });
            }
        }
        Ok(())
    }

    /// Must only be called after a successful `check`
    fn consume(&mut self, amounts: &ResourceAmounts) {
        for kind in ResourceKind::ALL {
            self.counter_mut(kind).consumed += amounts.get(kind);
        }
    }

    fn refund(&mut self, amounts: &ResourceAmounts) {
        for kind in ResourceKind::ALL {
            let counter = self.counter_mut(kind);
            counter.consumed = counter.consumed.saturating_sub(amounts.get(kind));
        }
    }

    fn status(&self) -> ResourceStatus {
        let amounts = |f: fn(&Counter) -> u64| {
            ResourceAmounts::new(f(&self.credits), f(&self.tokens), f(&self.time))
        };
        ResourceStatus {
            initial: amounts(|c| c.initial),
            consumed: amounts(|c| c.consumed),
            remaining: amounts(Counter::remaining),
        }
    }
}

/// Resource ledger shared by all live swarms
#[derive(Debug, Default)]
pub struct ResourceLedger {
    accounts: Mutex<HashMap<String, Account>>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open an account for a context with its initial budget
    pub fn open(&self, context_id: &str, budget: ResourceAmounts) -> Result<()> {
        let mut accounts = self.accounts.lock();
        if accounts.contains_key(context_id) {
            return Err(FlockError::AccountExists(context_id.to_string()));
        }
        accounts.insert(context_id.to_string(), Account::new(budget));
        debug!(
            "Opened ledger account {} (credits={}, tokens={}, time_ms={})",
            context_id, budget.credits, budget.tokens, budget.time_ms
        );
        Ok(())
    }

    /// Close an account, returning its final status
    pub fn close(&self, context_id: &str) -> Option<ResourceStatus> {
        let account = self.accounts.lock().remove(context_id)?;
        debug!("Closed ledger account {}", context_id);
        Some(account.status())
    }

    pub fn contains(&self, context_id: &str) -> bool {
        self.accounts.lock().contains_key(context_id)
    }

    /// Reserve `amount` of one kind
    pub fn reserve(&self, context_id: &str, kind: ResourceKind, amount: u64) -> Result<Reservation> {
        self.reserve_usage(context_id, ResourceAmounts::default().with(kind, amount))
    }

    /// Reserve combined usage; every kind is checked before any is applied
    pub fn reserve_usage(&self, context_id: &str, amounts: ResourceAmounts) -> Result<Reservation> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(context_id)
            .ok_or_else(|| FlockError::AccountNotFound(context_id.to_string()))?;

        account.check(&amounts)?;
        account.consume(&amounts);

        let reservation = Reservation {
            id: Uuid::new_v4(),
            context_id: context_id.to_string(),
            amounts,
        };
        account.outstanding.insert(reservation.id, amounts);

        debug!(
            "Reserved {:?} on {} (reservation {})",
            amounts, context_id, reservation.id
        );
        Ok(reservation)
    }

    /// Reverse a reservation in full; a reservation can be rolled back once
    pub fn rollback(&self, reservation: &Reservation) -> Result<ResourceAmounts> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(&reservation.context_id)
            .ok_or_else(|| FlockError::AccountNotFound(reservation.context_id.clone()))?;

        let amounts = account
            .outstanding
            .remove(&reservation.id)
            .ok_or_else(|| FlockError::ReservationNotFound(reservation.id.to_string()))?;
        account.refund(&amounts);

        debug!(
            "Rolled back reservation {} on {}",
            reservation.id, reservation.context_id
        );
        Ok(amounts)
    }

    /// Make a reservation final; it can no longer be rolled back
    pub fn commit(&self, reservation: &Reservation) -> Result<()> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(&reservation.context_id)
            .ok_or_else(|| FlockError::AccountNotFound(reservation.context_id.clone()))?;

        account
            .outstanding
            .remove(&reservation.id)
            .map(|_| ())
            .ok_or_else(|| FlockError::ReservationNotFound(reservation.id.to_string()))
    }

    /// Replace a reservation with the usage actually reported for the work
    ///
    /// Unused amounts are refunded and overruns charged, atomically. If an
    /// overrun cannot be covered nothing changes and the original reservation
    /// stays outstanding.
    pub fn settle(&self, reservation: &Reservation, actual: ResourceAmounts) -> Result<Reservation> {
        let mut accounts = self.accounts.lock();
        let account = accounts
            .get_mut(&reservation.context_id)
            .ok_or_else(|| FlockError::AccountNotFound(reservation.context_id.clone()))?;

        let reserved = *account
            .outstanding
            .get(&reservation.id)
            .ok_or_else(|| FlockError::ReservationNotFound(reservation.id.to_string()))?;

        for kind in ResourceKind::ALL {
            let extra = actual.get(kind).saturating_sub(reserved.get(kind));
            let remaining = account.counter(kind).remaining();
            if extra > remaining {
                return Err(FlockError::BudgetExceeded {
                    kind,
                    requested: extra,
                    remaining,
                });
            }
        }

        account.outstanding.remove(&reservation.id);
        account.refund(&reserved);
        account.consume(&actual);

        let settled = Reservation {
            id: Uuid::new_v4(),
            context_id: reservation.context_id.clone(),
            amounts: actual,
        };
        account.outstanding.insert(settled.id, actual);

        debug!(
            "Settled reservation {} on {}: {:?} -> {:?}",
            reservation.id, reservation.context_id, reserved, actual
        );
        Ok(settled)
    }

    /// Current counters for a context
    pub fn snapshot(&self, context_id: &str) -> Result<ResourceStatus> {
        self.accounts
            .lock()
            .get(context_id)
            .map(Account::status)
            .ok_or_else(|| FlockError::AccountNotFound(context_id.to_string()))
    }

    /// Number of reservations that can still be rolled back
    pub fn outstanding(&self, context_id: &str) -> usize {
        self.accounts
            .lock()
            .get(context_id)
            .map(|a| a.outstanding.len())
            .unwrap_or(0)
    }
}
