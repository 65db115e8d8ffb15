//! Post-assignment state mutation.
//!
//! [`apply`] runs the full six-step update for an accepted (vehicle, route)
//! pair. Every fallible input is resolved before the first field write — the
//! relocation leg arrives pre-computed inside [`Feasible`] — so the update
//! cannot fail midway and the state always reflects either no assignment or
//! a complete one.

use chrono::{Duration, NaiveDateTime};

use fleet_core::state::Relocation;
use fleet_core::{FleetError, FleetResult, OptimizerConfig, Route, VehicleState};

use crate::costs::CostModel;
use crate::feasibility::Feasible;
use crate::oracle::Connection;

/// What the mutation did, for the assignment record.
#[derive(Debug, Clone, Copy)]
pub struct Applied {
    pub serviced: bool,
    pub relocation: Option<Connection>,
    pub relocation_cost: f64,
    pub odometer_before: i64,
    pub odometer_after: i64,
    pub annual_before: i64,
    pub annual_after: i64,
}

/// Advance the lease year until `at` falls inside `[lease_start, lease_end)`.
/// Resets cascade when the vehicle sat idle across several boundaries.
fn advance_lease_year(state: &mut VehicleState, at: NaiveDateTime) {
    while at >= state.lease_end {
        state.km_this_lease_year = 0;
        state.lease_start = state.lease_end;
        state.lease_end += Duration::days(365);
        state.lease_cycle_number += 1;
    }
}

/// Split a route's kilometres across a lease-year boundary by elapsed
/// wall-time fraction. Returns the share belonging to the year the route
/// started in; the remainder (with all rounding residue) goes to the next.
fn prorate_current_year(route: &Route, lease_end: NaiveDateTime, distance_km: i64) -> i64 {
    let total_secs = route.duration_seconds();
    if total_secs <= 0 {
        return distance_km;
    }
    let current_secs = (lease_end - route.start_time).num_seconds().clamp(0, total_secs);
    distance_km * current_secs / total_secs
}

/// Apply an accepted assignment to the vehicle state.
pub fn apply(
    state: &mut VehicleState,
    route: &Route,
    feas: &Feasible,
    cost_model: &CostModel,
    config: &OptimizerConfig,
) -> FleetResult<Applied> {
    let start_location = route
        .start_location()
        .ok_or_else(|| FleetError::Validation(format!("route {} has no segments", route.id)))?;
    let end_location = route
        .end_location()
        .ok_or_else(|| FleetError::Validation(format!("route {} has no segments", route.id)))?;

    let odometer_before = state.odometer_km;
    let annual_before = state.km_this_lease_year;

    // 1. Lease-year reset on the route start
    advance_lease_year(state, route.start_time);

    // 2. Prune the relocation window
    state.prune_relocations(route.start_time, config.swap_policy.period());

    // 3. Pending service precedes everything else on the timeline
    if feas.needs_service {
        let service_end = state.available_from + cost_model.service_duration();
        state.km_since_service = 0;
        state.services_done += 1;
        state.service_cost_accrued += cost_model.service_cost();
        state.available_from = service_end;
    }

    // 4. Relocation leg
    let mut relocation = None;
    let mut relocation_cost = 0.0;
    if let Some(conn) = feas.relocation.filter(|c| c.is_move()) {
        let from = state.current_location.ok_or_else(|| {
            FleetError::Invariant(format!("vehicle {} relocating from nowhere", state.vehicle_id))
        })?;
        state.relocation_history.push_back(Relocation {
            at: route.start_time,
            from,
            to: start_location,
        });
        let reloc_km = conn.distance_km.whole();
        state.odometer_km += reloc_km;
        state.km_this_lease_year += reloc_km;
        state.lifetime_km += reloc_km;
        state.km_since_service += reloc_km;
        relocation_cost = cost_model.relocation_cost(&conn);
        state.total_relocations += 1;
        state.total_relocation_cost += relocation_cost;
        relocation = Some(conn);
    }

    // 5. Route kilometres, pro-rated across a lease-year boundary
    let distance_km = route.distance_km as i64;
    if route.end_time > state.lease_end {
        let current_share = prorate_current_year(route, state.lease_end, distance_km);
        state.km_this_lease_year += current_share;
        advance_lease_year(state, route.end_time);
        state.km_this_lease_year += distance_km - current_share;
    } else {
        state.km_this_lease_year += distance_km;
    }
    state.odometer_km += distance_km;
    state.lifetime_km += distance_km;
    state.km_since_service += distance_km;

    // 6. Position, availability, accounting
    state.current_location = Some(end_location);
    state.available_from = route.end_time;
    state.last_route_id = Some(route.id);
    state.routes_assigned += 1;
    state.total_overage_cost =
        cost_model.overage_cost(state.km_this_lease_year, state.annual_limit_km);

    Ok(Applied {
        serviced: feas.needs_service,
        relocation,
        relocation_cost,
        odometer_before,
        odometer_after: state.odometer_km,
        annual_before,
        annual_after: state.km_this_lease_year,
    })
}
