//! Per-swarm tick scheduler
//!
//! Each scheduled swarm owns one tokio task driven by an interval and a
//! cancellation token. The tick body is awaited inside that task, so two ticks
//! of the same swarm never overlap; ticks that fall due while one is running
//! are skipped. Ticks of different swarms run concurrently.

use async_trait::async_trait;
use flock_core::{Result, SwarmId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// What the scheduler should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    /// Remove this swarm's schedule
    Stop,
}

/// Body of a scheduled tick
#[async_trait]
pub trait TickHandler: Send + Sync + 'static {
    /// Run one tick; `cancel` fires when the schedule is cancelled mid-tick
    async fn tick(&self, swarm_id: SwarmId, cancel: &CancellationToken) -> Result<TickControl>;
}

struct Entry {
    generation: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Scheduler keyed by swarm id
pub struct TickScheduler {
    entries: Arc<Mutex<HashMap<SwarmId, Entry>>>,
    next_generation: AtomicU64,
    root: CancellationToken,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            root: CancellationToken::new(),
        }
    }

    /// Schedule `handler` every `period`, replacing any existing schedule
    ///
    /// The first tick fires one period from now.
    pub fn schedule(&self, swarm_id: SwarmId, period: Duration, handler: Arc<dyn TickHandler>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();

        let mut entries = self.entries.lock();
        if let Some(previous) = entries.remove(&swarm_id) {
            debug!("Replacing schedule for swarm {}", swarm_id);
            previous.token.cancel();
        }

        let handle = tokio::spawn(run_schedule(
            swarm_id,
            period,
            handler,
            token.clone(),
            generation,
            self.entries.clone(),
        ));

        entries.insert(
            swarm_id,
            Entry {
                generation,
                token,
                handle,
            },
        );
        debug!("Scheduled swarm {} every {:?}", swarm_id, period);
    }

    /// Cancel a swarm's schedule; a tick already running may finish
    pub fn cancel(&self, swarm_id: &SwarmId) -> bool {
        match self.entries.lock().remove(swarm_id) {
            Some(entry) => {
                entry.token.cancel();
                debug!("Cancelled schedule for swarm {}", swarm_id);
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, swarm_id: &SwarmId) -> bool {
        self.entries.lock().contains_key(swarm_id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every schedule and wait for all tick tasks to finish
    pub async fn shutdown(&self) {
        self.root.cancel();

        let handles: Vec<JoinHandle<()>> = self
            .entries
            .lock()
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!("Tick task ended abnormally: {}", e);
            }
        }
        debug!("Tick scheduler shut down");
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_schedule(
    swarm_id: SwarmId,
    period: Duration,
    handler: Arc<dyn TickHandler>,
    token: CancellationToken,
    generation: u64,
    entries: Arc<Mutex<HashMap<SwarmId, Entry>>>,
) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }

        match handler.tick(swarm_id, &token).await {
            Ok(TickControl::Continue) => {}
            Ok(TickControl::Stop) => {
                debug!("Swarm {} stopped its own schedule", swarm_id);
                break;
            }
            Err(e) => warn!("Tick for swarm {} failed: {}", swarm_id, e),
        }

        if token.is_cancelled() {
            break;
        }
    }

    // Only remove our own entry; a reschedule may have replaced it
    let mut entries = entries.lock();
    if entries.get(&swarm_id).map(|e| e.generation) == Some(generation) {
        entries.remove(&swarm_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flock_core::FlockError;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        ticks: AtomicUsize,
        stop_after: usize,
        fail: bool,
    }

    impl Counting {
        fn new(stop_after: usize) -> Arc<Self> {
            Arc::new(Self {
                ticks: AtomicUsize::new(0),
                stop_after,
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                ticks: AtomicUsize::new(0),
                stop_after: usize::MAX,
                fail: true,
            })
        }

        fn count(&self) -> usize {
            self.ticks.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TickHandler for Counting {
        async fn tick(&self, _: SwarmId, _: &CancellationToken) -> Result<TickControl> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(FlockError::Other("boom".to_string()));
            }
            if n >= self.stop_after {
                Ok(TickControl::Stop)
            } else {
                Ok(TickControl::Continue)
            }
        }
    }

    #[tokio::test]
    async fn test_ticks_until_stop() {
        let scheduler = TickScheduler::new();
        let handler = Counting::new(3);
        let id = SwarmId::new();

        scheduler.schedule(id, Duration::from_millis(10), handler.clone());
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(handler.count(), 3);
        assert!(!scheduler.is_scheduled(&id));
    }

    #[tokio::test]
    async fn test_cancel_stops_ticks() {
        let scheduler = TickScheduler::new();
        let handler = Counting::new(usize::MAX);
        let id = SwarmId::new();

        scheduler.schedule(id, Duration::from_millis(10), handler.clone());
        tokio::time::sleep(Duration::from_millis(55)).await;
        assert!(scheduler.cancel(&id));
        let seen = handler.count();
        assert!(seen > 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.count(), seen);
        assert!(!scheduler.cancel(&id));
    }

    #[tokio::test]
    async fn test_failing_tick_keeps_schedule() {
        let scheduler = TickScheduler::new();
        let handler = Counting::failing();
        let id = SwarmId::new();

        scheduler.schedule(id, Duration::from_millis(10), handler.clone());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(handler.count() >= 2);
        assert!(scheduler.is_scheduled(&id));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_reschedule_replaces_entry() {
        let scheduler = TickScheduler::new();
        let first = Counting::new(usize::MAX);
        let second = Counting::new(usize::MAX);
        let id = SwarmId::new();

        scheduler.schedule(id, Duration::from_millis(10), first.clone());
        scheduler.schedule(id, Duration::from_millis(10), second.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(first.count(), 0);
        assert!(second.count() > 0);
        assert_eq!(scheduler.len(), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_everything() {
        let scheduler = TickScheduler::new();
        let handler = Counting::new(usize::MAX);
        for _ in 0..5 {
            scheduler.schedule(SwarmId::new(), Duration::from_millis(5), handler.clone());
        }
        assert_eq!(scheduler.len(), 5);

        scheduler.shutdown().await;
        assert!(scheduler.is_empty());

        let seen = handler.count();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handler.count(), seen);
    }
}
