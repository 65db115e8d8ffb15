//! Assignment driver: the deterministic timeline walk.
//!
//! Routes are consumed in `(start_time, start_location)` order. For each
//! route every vehicle state is gated (strict pass), priced, optionally
//! chain-scored, and the winner's state is mutated atomically. When the
//! strict pass yields nothing, a relaxed pass drops the swap gate and
//! attaches a fixed violation penalty; when that also fails the route is
//! recorded as unassigned and the walk continues.
//!
//! Determinism contract: for identical inputs the assignment list is
//! byte-identical. Vehicle states are kept in a `BTreeMap`, candidates are
//! collected in ascending vehicle id, and every comparison breaks ties on
//! the smaller id.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Duration;

use fleet_core::config::AssignmentStrategy;
use fleet_core::state::RelocationLeg;
use fleet_core::{
    Assignment, FleetError, FleetResult, LocationId, OptimizerConfig, Route, RouteId, RunStats,
    Vehicle, VehicleId, VehicleState,
};

use crate::chain::chain_score;
use crate::costs::CostModel;
use crate::events::{EventSink, RunEvent};
use crate::feasibility::{check, Feasible};
use crate::simulate;

/// Cost attached to an assignment that had to break the swap policy in the
/// relaxed fallback pass.
pub const SWAP_VIOLATION_PENALTY: f64 = 5000.0;

/// Vehicles become available this long before the first route, so an
/// opening relocation can be scheduled.
pub const PREPOSITIONING_GRACE_HOURS: i64 = 24;

// Clear-winner shortcut thresholds: chain scoring is skipped when the
// cheapest candidate leads by more than either margin.
const CLEAR_WINNER_ABS_GAP: f64 = 2000.0;
const CLEAR_WINNER_REL_GAP: f64 = 0.5;
const CHAIN_SHORTLIST: usize = 5;
const CHAIN_COST_WINDOW: f64 = 1.20;

/// Result of one driver run.
#[derive(Debug)]
pub struct AssignmentOutcome {
    pub assignments: Vec<Assignment>,
    pub unassigned: Vec<RouteId>,
    pub states: BTreeMap<VehicleId, VehicleState>,
    pub stats: RunStats,
}

struct Candidate {
    vehicle_id: VehicleId,
    from_location: Option<LocationId>,
    routes_assigned: u32,
    cost: f64,
    feasible: Feasible,
}

pub struct AssignmentDriver<'a> {
    routes: &'a [Route],
    config: &'a OptimizerConfig,
    oracle: &'a crate::oracle::DistanceOracle,
    cost_model: CostModel,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> AssignmentDriver<'a> {
    /// `routes` must already be in timeline order (see
    /// [`fleet_core::sort_routes`]); the oracle is owned by this run's
    /// caller and shared with nothing else.
    pub fn new(
        config: &'a OptimizerConfig,
        routes: &'a [Route],
        oracle: &'a crate::oracle::DistanceOracle,
    ) -> Self {
        let cost_model = CostModel::new(config.costs.clone(), config.service_policy.clone());
        AssignmentDriver {
            routes,
            config,
            oracle,
            cost_model,
            cancel: None,
        }
    }

    /// Install a cooperative cancellation flag, checked once per route.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Routes actually assigned: a prefix of the timeline bounded by
    /// `assignment_lookahead_days`. Later routes stay visible to the chain
    /// scorer only.
    fn assignable_len(&self) -> usize {
        let days = self.config.assignment.assignment_lookahead_days;
        if days <= 0 || self.routes.is_empty() {
            return self.routes.len();
        }
        let cutoff = self.routes[0].start_time + Duration::days(days);
        self.routes.partition_point(|r| r.start_time < cutoff)
    }

    pub fn run(
        &self,
        vehicles: &[Vehicle],
        sink: &mut dyn EventSink,
    ) -> FleetResult<AssignmentOutcome> {
        let mut states: BTreeMap<VehicleId, VehicleState> = BTreeMap::new();
        let mut assignments = Vec::new();
        let mut unassigned = Vec::new();
        let mut stats = RunStats {
            complete: true,
            ..RunStats::default()
        };

        if self.routes.is_empty() {
            for vehicle in vehicles {
                states.insert(
                    vehicle.id,
                    VehicleState::from_vehicle(vehicle, vehicle.lease_start),
                );
            }
            sink.emit(&RunEvent::RunCompleted { stats: stats.clone() });
            return Ok(AssignmentOutcome { assignments, unassigned, states, stats });
        }

        let available_from =
            self.routes[0].start_time - Duration::hours(PREPOSITIONING_GRACE_HOURS);
        for vehicle in vehicles {
            states.insert(vehicle.id, VehicleState::from_vehicle(vehicle, available_from));
        }

        let chain_enabled = self.config.assignment.chain_enabled();
        let interval = self.config.performance.progress_report_interval.max(1);
        let assignable = self.assignable_len();

        for (index, route) in self.routes[..assignable].iter().enumerate() {
            if self.cancelled() {
                stats.complete = false;
                break;
            }

            let mut candidates = self.collect_candidates(&states, route, true);
            if candidates.is_empty() {
                candidates = self.collect_candidates(&states, route, false);
                for candidate in &mut candidates {
                    candidate.cost += SWAP_VIOLATION_PENALTY;
                }
            }

            stats.routes_processed += 1;

            if candidates.is_empty() {
                unassigned.push(route.id);
                stats.routes_unassigned += 1;
                sink.emit(&RunEvent::UnassignedRoute {
                    route_id: route.id,
                    start_time: route.start_time,
                });
                self.maybe_progress(&mut stats, route, interval, sink);
                continue;
            }

            if self.config.assignment.strategy == AssignmentStrategy::Greedy {
                apply_workload_penalty(&mut candidates, &states);
            }

            candidates.sort_by(|a, b| {
                a.cost
                    .total_cmp(&b.cost)
                    .then_with(|| a.vehicle_id.cmp(&b.vehicle_id))
            });

            let (winner, winner_chain_score) =
                self.select(&candidates, route, index, &states, chain_enabled);
            let candidate = &candidates[winner];

            let state = states
                .get_mut(&candidate.vehicle_id)
                .expect("candidate vehicle has a state");
            let available_before = state.available_from;
            let applied = simulate::apply(
                state,
                route,
                &candidate.feasible,
                &self.cost_model,
                self.config,
            )?;

            // Internal invariants: a violation here is a bug, not bad input.
            if applied.odometer_after < applied.odometer_before {
                return Err(FleetError::Invariant(format!(
                    "vehicle {} odometer regressed on route {}",
                    candidate.vehicle_id, route.id
                )));
            }
            if state.available_from < available_before {
                return Err(FleetError::Invariant(format!(
                    "vehicle {} availability regressed on route {}",
                    candidate.vehicle_id, route.id
                )));
            }
            if let Some(cap) = state.lifetime_cap_km {
                if state.lifetime_km > cap {
                    return Err(FleetError::Invariant(format!(
                        "vehicle {} exceeded lifetime cap on route {}",
                        candidate.vehicle_id, route.id
                    )));
                }
            }

            let tolerance = self.cost_model.service_tolerance_km();
            let relocation = applied.relocation.map(|conn| RelocationLeg {
                from: candidate.from_location.expect("relocating candidate has a location"),
                to: route.start_location().expect("feasible route has a start"),
                distance_km: conn.distance_km,
                travel: conn.travel,
            });

            assignments.push(Assignment {
                route_id: route.id,
                vehicle_id: candidate.vehicle_id,
                date: route.start_time,
                route_distance_km: route.distance_km,
                route_start_location: route.start_location().expect("feasible route has a start"),
                route_end_location: route.end_location().expect("feasible route has an end"),
                vehicle_km_before: applied.odometer_before,
                vehicle_km_after: applied.odometer_after,
                annual_km_before: applied.annual_before,
                annual_km_after: applied.annual_after,
                requires_relocation: relocation.is_some(),
                requires_service: applied.serviced || state.needs_service(tolerance),
                assignment_cost: candidate.cost,
                relocation,
                overage_km: state.overage_km(),
                chain_score: winner_chain_score,
            });
            stats.routes_assigned += 1;

            self.maybe_progress(&mut stats, route, interval, sink);
        }

        for state in states.values() {
            stats.total_relocations += state.total_relocations as u64;
            stats.total_relocation_cost += state.total_relocation_cost;
            stats.total_overage_cost += state.total_overage_cost;
            stats.total_service_cost += state.service_cost_accrued;
        }
        stats.total_cost =
            stats.total_relocation_cost + stats.total_overage_cost + stats.total_service_cost;
        stats.avg_cost_per_route = if stats.routes_assigned > 0 {
            stats.total_cost / stats.routes_assigned as f64
        } else {
            0.0
        };

        sink.emit(&RunEvent::RunCompleted { stats: stats.clone() });

        Ok(AssignmentOutcome { assignments, unassigned, states, stats })
    }

    fn collect_candidates(
        &self,
        states: &BTreeMap<VehicleId, VehicleState>,
        route: &Route,
        enforce_swap: bool,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for (vehicle_id, state) in states {
            if let Ok(feasible) = check(state, route, self.oracle, self.config, enforce_swap) {
                let breakdown =
                    self.cost_model
                        .candidate_cost(state, route, feasible.relocation.as_ref());
                candidates.push(Candidate {
                    vehicle_id: *vehicle_id,
                    from_location: state.current_location,
                    routes_assigned: state.routes_assigned,
                    cost: breakdown.total(),
                    feasible,
                });
            }
        }
        candidates
    }

    /// Pick the winning candidate index, running the chain scorer only when
    /// the immediate costs are too close to call.
    fn select(
        &self,
        candidates: &[Candidate],
        route: &Route,
        route_index: usize,
        states: &BTreeMap<VehicleId, VehicleState>,
        chain_enabled: bool,
    ) -> (usize, f64) {
        if !chain_enabled || candidates.len() == 1 {
            return (0, 0.0);
        }

        let cheapest = candidates[0].cost;
        let gap = candidates[1].cost - cheapest;
        if gap > CLEAR_WINNER_ABS_GAP || gap / (cheapest + 1.0) > CLEAR_WINNER_REL_GAP {
            return (0, 0.0);
        }

        let window = cheapest * CHAIN_COST_WINDOW;
        let mut best_index = 0;
        let mut best_effective = f64::INFINITY;
        let mut best_chain = 0.0;

        for (i, candidate) in candidates.iter().take(CHAIN_SHORTLIST).enumerate() {
            if candidate.cost > window {
                continue;
            }
            let state = &states[&candidate.vehicle_id];
            let score = chain_score(
                state,
                route,
                self.routes,
                route_index,
                self.oracle,
                &self.cost_model,
                &self.config.assignment,
                &self.config.service_policy,
            );
            let effective = candidate.cost - self.config.assignment.chain_weight * score;
            // Strict < keeps the smaller vehicle id on ties
            if effective < best_effective {
                best_effective = effective;
                best_index = i;
                best_chain = score;
            }
        }
        (best_index, best_chain)
    }

    fn maybe_progress(
        &self,
        stats: &mut RunStats,
        route: &Route,
        interval: u64,
        sink: &mut dyn EventSink,
    ) {
        if stats.routes_processed % interval == 0 {
            sink.emit(&RunEvent::Progress {
                routes_processed: stats.routes_processed,
                routes_assigned: stats.routes_assigned,
                routes_unassigned: stats.routes_unassigned,
                current_time: route.start_time,
            });
        }
    }
}

/// Simple-greedy workload balancing: overloaded vehicles get a bounded
/// surcharge so work spreads across the active fleet. Intentionally absent
/// from the look-ahead strategy.
fn apply_workload_penalty(
    candidates: &mut [Candidate],
    states: &BTreeMap<VehicleId, VehicleState>,
) {
    let active: Vec<u32> = states
        .values()
        .map(|s| s.routes_assigned)
        .filter(|&n| n > 0)
        .collect();
    if active.is_empty() {
        return;
    }
    let average = active.iter().sum::<u32>() as f64 / active.len() as f64;
    if average <= 0.0 {
        return;
    }
    for candidate in candidates {
        let ratio = candidate.routes_assigned as f64 / average;
        if ratio > 1.2 {
            candidate.cost += (50.0 + (ratio - 1.2) * 200.0).min(500.0);
        }
    }
}

/// Convenience wrapper: validate-free single call used by the CLI and the
/// HTTP surface once inputs passed [`crate::validate::validate_inputs`].
pub fn run_assignment(
    vehicles: &[Vehicle],
    routes: &[Route],
    oracle: &crate::oracle::DistanceOracle,
    config: &OptimizerConfig,
    sink: &mut dyn EventSink,
    cancel: Option<Arc<AtomicBool>>,
) -> FleetResult<AssignmentOutcome> {
    let mut driver = AssignmentDriver::new(config, routes, oracle);
    if let Some(flag) = cancel {
        driver = driver.with_cancel(flag);
    }
    driver.run(vehicles, sink)
}
