//! Fail-open helpers for optional collaborator results
//!
//! Observation and reflection inputs are allowed to be missing: an agent that
//! has not reported, a monitor that is down. These helpers turn a failed
//! collaborator call into `None` and log it, so one missing input never
//! aborts a tick.
//!
//! DO NOT use fail-open for:
//! - Ledger reservations (correctness)
//! - Swarm store writes (state)
//! - Decision execution (recorded on the decision instead)

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Await a collaborator call, logging and discarding any error
///
/// ```no_run
/// use flock_core::fail_open::fail_open;
/// use flock_core::Result;
///
/// async fn metrics() -> Result<u32> {
///     Ok(3)
/// }
///
/// async fn example() {
///     let value = fail_open("performance_metrics", metrics()).await;
///     assert_eq!(value, Some(3));
/// }
/// ```
pub async fn fail_open<Fut, T>(operation_name: &str, fut: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

/// Like [`fail_open`] for collaborators that already return an optional value
pub async fn fail_open_optional<Fut, T>(operation_name: &str, fut: Fut) -> Option<T>
where
    Fut: Future<Output = Result<Option<T>>>,
{
    fail_open(operation_name, fut).await.flatten()
}
