//! Mutable per-vehicle simulation state and the records the driver emits.
//!
//! One [`VehicleState`] exists per vehicle per run, owned exclusively by the
//! assignment driver. It is created from the static [`Vehicle`] at driver
//! init and mutated exactly once per accepted assignment.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::units::{Kilometers, Minutes};
use crate::{LocationId, RouteId, Vehicle, VehicleId};

/// A policy-counted relocation: when it was scheduled and between which
/// locations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Relocation {
    pub at: NaiveDateTime,
    pub from: LocationId,
    pub to: LocationId,
}

/// Runtime state of one vehicle during a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleState {
    pub vehicle_id: VehicleId,
    pub current_location: Option<LocationId>,
    pub odometer_km: i64,
    pub km_since_service: i64,
    pub km_this_lease_year: i64,
    pub lifetime_km: i64,
    pub available_from: NaiveDateTime,
    pub last_route_id: Option<RouteId>,
    pub lease_cycle_number: u32,
    pub lease_start: NaiveDateTime,
    pub lease_end: NaiveDateTime,
    pub annual_limit_km: i64,
    pub service_interval_km: i64,
    pub lifetime_cap_km: Option<i64>,

    /// Recent relocations; entries older than the swap period are pruned.
    pub relocation_history: VecDeque<Relocation>,
    pub total_relocations: u32,
    pub services_done: u32,
    pub routes_assigned: u32,
    pub service_cost_accrued: f64,
    pub total_relocation_cost: f64,
    pub total_overage_cost: f64,
}

impl VehicleState {
    /// Initialise state from the static vehicle record.
    ///
    /// Service and lease-year counters start at zero (the fleet is assumed
    /// freshly serviced at the start of the horizon); lifetime kilometres
    /// start at the odometer reading.
    pub fn from_vehicle(vehicle: &Vehicle, available_from: NaiveDateTime) -> Self {
        VehicleState {
            vehicle_id: vehicle.id,
            current_location: vehicle.current_location,
            odometer_km: vehicle.current_odometer_km,
            km_since_service: 0,
            km_this_lease_year: 0,
            lifetime_km: vehicle.current_odometer_km,
            available_from,
            last_route_id: None,
            lease_cycle_number: 1,
            lease_start: vehicle.lease_start,
            lease_end: vehicle.lease_end,
            annual_limit_km: vehicle.annual_limit_km(),
            service_interval_km: vehicle.service_interval_km,
            lifetime_cap_km: vehicle.lifetime_cap_km(),
            relocation_history: VecDeque::new(),
            total_relocations: 0,
            services_done: 0,
            routes_assigned: 0,
            service_cost_accrued: 0.0,
            total_relocation_cost: 0.0,
            total_overage_cost: 0.0,
        }
    }

    /// Drop history entries older than `now - swap_period`.
    pub fn prune_relocations(&mut self, now: NaiveDateTime, swap_period: Duration) {
        let cutoff = now - swap_period;
        while let Some(front) = self.relocation_history.front() {
            if front.at < cutoff {
                self.relocation_history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Relocations inside the swap window ending at `now`. Read-time prune:
    /// stale entries are not counted even if not yet removed.
    pub fn recent_relocations(&self, now: NaiveDateTime, swap_period: Duration) -> usize {
        let cutoff = now - swap_period;
        self.relocation_history.iter().filter(|r| r.at >= cutoff).count()
    }

    /// Whether the accumulated kilometres already force a service stop.
    pub fn needs_service(&self, tolerance_km: i64) -> bool {
        self.km_since_service > self.service_interval_km + tolerance_km
    }

    /// Kilometres over the annual allowance in the current lease year.
    pub fn overage_km(&self) -> i64 {
        (self.km_this_lease_year - self.annual_limit_km).max(0)
    }
}

/// Relocation leg attached to an assignment record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelocationLeg {
    pub from: LocationId,
    pub to: LocationId,
    pub distance_km: Kilometers,
    pub travel: Minutes,
}

/// One accepted (route, vehicle) pairing with its full audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub route_id: RouteId,
    pub vehicle_id: VehicleId,
    pub date: NaiveDateTime,
    pub route_distance_km: f64,
    pub route_start_location: LocationId,
    pub route_end_location: LocationId,
    pub vehicle_km_before: i64,
    pub vehicle_km_after: i64,
    pub annual_km_before: i64,
    pub annual_km_after: i64,
    pub requires_relocation: bool,
    pub requires_service: bool,
    pub assignment_cost: f64,
    pub relocation: Option<RelocationLeg>,
    pub overage_km: i64,
    pub chain_score: f64,
}

/// Quality metrics attached to a placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementQuality {
    pub locations_used: usize,
    pub max_concentration: f64,
    pub demand_coverage: f64,
    pub estimated_relocation_cost: f64,
}

/// Result of the placement engine: initial location per vehicle plus a
/// quality report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementResult {
    pub placements: BTreeMap<VehicleId, LocationId>,
    pub demand: BTreeMap<LocationId, u32>,
    pub quality: PlacementQuality,
}

/// Aggregate counters for a completed (or cancelled) run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub routes_processed: u64,
    pub routes_assigned: u64,
    pub routes_unassigned: u64,
    pub total_relocations: u64,
    pub total_cost: f64,
    pub total_relocation_cost: f64,
    pub total_overage_cost: f64,
    pub total_service_cost: f64,
    pub avg_cost_per_route: f64,
    /// False when the run was cancelled and the result is partial.
    pub complete: bool,
}
