//! # flock-metrics
//!
//! Observability for Flock swarms.
//!
//! This crate provides:
//! - Per-swarm tick telemetry collection
//! - The monitoring collaborator consulted by the OODA Reflect phase

mod collector;

pub use collector::{GlobalMetrics, MetricsCollector, SwarmMetrics, TickEvent};
