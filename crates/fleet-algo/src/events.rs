//! Structured progress events and the sink they flow through.
//!
//! The driver emits events; what happens to them is the caller's business.
//! The default [`LogSink`] writes human-readable lines through `tracing`;
//! tests collect events with [`VecSink`].

use chrono::NaiveDateTime;
use serde::Serialize;

use fleet_core::{RouteId, RunStats};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    Progress {
        routes_processed: u64,
        routes_assigned: u64,
        routes_unassigned: u64,
        current_time: NaiveDateTime,
    },
    UnassignedRoute {
        route_id: RouteId,
        start_time: NaiveDateTime,
    },
    RunCompleted {
        stats: RunStats,
    },
}

pub trait EventSink {
    fn emit(&mut self, event: &RunEvent);
}

/// Default sink: human-readable lines at info level.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Progress {
                routes_processed,
                routes_assigned,
                routes_unassigned,
                current_time,
            } => {
                tracing::info!(
                    "progress: {} routes processed ({} assigned, {} unassigned), at {}",
                    routes_processed,
                    routes_assigned,
                    routes_unassigned,
                    current_time
                );
            }
            RunEvent::UnassignedRoute { route_id, start_time } => {
                tracing::warn!("no feasible vehicle for route {} starting {}", route_id, start_time);
            }
            RunEvent::RunCompleted { stats } => {
                tracing::info!(
                    "run completed: {}/{} routes assigned, total cost {:.2}",
                    stats.routes_assigned,
                    stats.routes_processed,
                    stats.total_cost
                );
            }
        }
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&mut self, _event: &RunEvent) {}
}

/// Collects events for inspection in tests.
#[derive(Debug, Default)]
pub struct VecSink {
    pub events: Vec<RunEvent>,
}

impl EventSink for VecSink {
    fn emit(&mut self, event: &RunEvent) {
        self.events.push(event.clone());
    }
}
