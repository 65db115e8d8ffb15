//! Initial vehicle placement.
//!
//! Where should each vehicle start so the assignment simulator has the
//! least repositioning to do? The engine analyses route flow over a short
//! horizon and distributes the fleet with one of three strategies, all
//! sharing the same flow statistics and quality report.

use std::collections::BTreeMap;

use chrono::Duration;

use fleet_core::config::PlacementStrategy;
use fleet_core::{
    LocationId, OptimizerConfig, PlacementQuality, PlacementResult, Route, Vehicle, VehicleId,
};

use crate::costs::CostModel;
use crate::oracle::DistanceOracle;

// Soft concentration starts biting at this fraction of the per-location cap.
const SOFT_CAP_FRACTION: f64 = 0.7;
// Quadratic growth rate of the soft penalty, and the flat repellent past the cap.
const SOFT_PENALTY_SCALE: f64 = 25.0;
const HARD_CAP_REPELLENT: f64 = 10_000.0;
// Connectivity probe parameters.
const PROBE_SAMPLES: usize = 20;
const PROBE_HIT_THRESHOLD: f64 = 0.5;
const CONNECTIVITY_BONUS: f64 = -300.0;
// Fallback per-relocation estimate when no priced path exists.
const FALLBACK_RELOCATION_ESTIMATE: f64 = 5000.0;

/// Route flow per location over the placement horizon.
#[derive(Debug, Default)]
pub struct FlowStats {
    pub starts: BTreeMap<LocationId, u32>,
    pub ends: BTreeMap<LocationId, u32>,
}

impl FlowStats {
    pub fn net_demand(&self, loc: LocationId) -> i64 {
        let starts = *self.starts.get(&loc).unwrap_or(&0) as i64;
        let ends = *self.ends.get(&loc).unwrap_or(&0) as i64;
        starts - ends
    }

    pub fn activity(&self, loc: LocationId) -> u32 {
        self.starts.get(&loc).unwrap_or(&0) + self.ends.get(&loc).unwrap_or(&0)
    }

    /// Locations with any traffic, most active first; id breaks ties.
    pub fn locations_by_activity(&self) -> Vec<LocationId> {
        let mut ids: Vec<LocationId> = self
            .starts
            .keys()
            .chain(self.ends.keys())
            .copied()
            .collect();
        ids.sort_by_key(|id| id.value());
        ids.dedup();
        ids.sort_by(|a, b| {
            self.activity(*b)
                .cmp(&self.activity(*a))
                .then_with(|| a.value().cmp(&b.value()))
        });
        ids
    }

    pub fn total_activity(&self) -> u64 {
        self.starts.values().map(|&n| n as u64).sum::<u64>()
            + self.ends.values().map(|&n| n as u64).sum::<u64>()
    }
}

/// Count route starts and ends per location within `lookahead_days` of the
/// first route. Routes must be time-sorted.
pub fn analyze_flow(routes: &[Route], lookahead_days: i64) -> FlowStats {
    let mut stats = FlowStats::default();
    let Some(first) = routes.first() else {
        return stats;
    };
    let horizon = first.start_time + Duration::days(lookahead_days.max(0));

    for route in routes {
        if lookahead_days > 0 && route.start_time >= horizon {
            break;
        }
        if let Some(start) = route.start_location() {
            *stats.starts.entry(start).or_insert(0) += 1;
        }
        if let Some(end) = route.end_location() {
            *stats.ends.entry(end).or_insert(0) += 1;
        }
    }
    stats
}

/// Compute an initial placement for the fleet.
pub fn compute_placement(
    vehicles: &[Vehicle],
    routes: &[Route],
    oracle: &DistanceOracle,
    config: &OptimizerConfig,
) -> PlacementResult {
    let flow = analyze_flow(routes, config.placement.lookahead_days);
    let cap = config.placement.cap_for_fleet(vehicles.len());

    let placements = match config.placement.strategy {
        PlacementStrategy::CostMatrix => cost_matrix_placement(vehicles, &flow, oracle, cap),
        PlacementStrategy::Proportional => proportional_placement(vehicles, &flow, config),
        PlacementStrategy::CoverageFirst => coverage_first_placement(vehicles, &flow, config),
    };

    let cost_model = CostModel::new(config.costs.clone(), config.service_policy.clone());
    let quality = assess_quality(&placements, &flow, oracle, &cost_model, vehicles.len());
    let demand = flow.starts.iter().map(|(loc, n)| (*loc, *n)).collect();

    PlacementResult { placements, demand, quality }
}

/// Per-location placement cost for the cost-matrix strategy: busy,
/// under-supplied, well-connected locations are cheap.
fn location_base_cost(loc: LocationId, flow: &FlowStats, oracle: &DistanceOracle, probe: &[LocationId]) -> f64 {
    let activity = flow.activity(loc) as f64;
    let mut cost = 1000.0 / (activity + 2.0).ln();

    let net = flow.net_demand(loc);
    if net > 0 {
        cost -= (net as f64 * 10.0).min(200.0);
    } else if net < 0 {
        cost += ((-net) as f64 * 5.0).min(100.0);
    }

    let samples: Vec<LocationId> = probe.iter().filter(|&&p| p != loc).take(PROBE_SAMPLES).copied().collect();
    if !samples.is_empty() {
        let hits = samples.iter().filter(|&&p| oracle.has_direct(loc, p)).count();
        let hit_ratio = hits as f64 / samples.len() as f64;
        if hit_ratio >= PROBE_HIT_THRESHOLD {
            cost += CONNECTIVITY_BONUS * hit_ratio;
        }
    }
    cost
}

fn concentration_penalty(count_after: usize, cap: usize) -> f64 {
    let soft = SOFT_CAP_FRACTION * cap as f64;
    let c = count_after as f64;
    if c > cap as f64 {
        HARD_CAP_REPELLENT + (c - cap as f64) * 1000.0
    } else if c > soft {
        let over = c - soft;
        SOFT_PENALTY_SCALE * over * over
    } else {
        0.0
    }
}

fn cost_matrix_placement(
    vehicles: &[Vehicle],
    flow: &FlowStats,
    oracle: &DistanceOracle,
    cap: usize,
) -> BTreeMap<VehicleId, LocationId> {
    let mut placements = BTreeMap::new();
    let candidates = flow.locations_by_activity();
    if candidates.is_empty() {
        return fallback_placement(vehicles);
    }

    // Static part of the matrix is identical for all vehicles
    let base: Vec<(LocationId, f64)> = candidates
        .iter()
        .map(|&loc| (loc, location_base_cost(loc, flow, oracle, &candidates)))
        .collect();

    let mut counts: BTreeMap<LocationId, usize> = BTreeMap::new();

    for vehicle in vehicles {
        let mut best: Option<(f64, LocationId)> = None;
        for &(loc, base_cost) in &base {
            let occupied = counts.get(&loc).copied().unwrap_or(0);
            let cost = base_cost + concentration_penalty(occupied + 1, cap);
            let better = match best {
                None => true,
                // Strict < keeps the more active (earlier) location on ties
                Some((best_cost, _)) => cost < best_cost,
            };
            if better {
                best = Some((cost, loc));
            }
        }
        let loc = best.map(|(_, loc)| loc).unwrap_or(candidates[0]);
        placements.insert(vehicle.id, loc);
        *counts.entry(loc).or_insert(0) += 1;
    }
    placements
}

fn proportional_placement(
    vehicles: &[Vehicle],
    flow: &FlowStats,
    config: &OptimizerConfig,
) -> BTreeMap<VehicleId, LocationId> {
    let ordered = flow.locations_by_activity();
    if ordered.is_empty() {
        return fallback_placement(vehicles);
    }
    let total = flow.total_activity().max(1) as f64;
    let cap = ((vehicles.len() as f64 * config.placement.max_concentration) as usize).max(1);

    let mut placements = BTreeMap::new();
    let mut index = 0usize;

    for &loc in &ordered {
        if index >= vehicles.len() {
            break;
        }
        let share = flow.activity(loc) as f64 / total;
        let mut quota = ((vehicles.len() as f64 * share) as usize).max(1);
        quota = quota.min(cap).min(vehicles.len() - index);
        for _ in 0..quota {
            placements.insert(vehicles[index].id, loc);
            index += 1;
        }
    }

    // Leftovers pile onto the most active location
    let top = ordered[0];
    while index < vehicles.len() {
        placements.insert(vehicles[index].id, top);
        index += 1;
    }
    placements
}

fn coverage_first_placement(
    vehicles: &[Vehicle],
    flow: &FlowStats,
    config: &OptimizerConfig,
) -> BTreeMap<VehicleId, LocationId> {
    let ordered = flow.locations_by_activity();
    if ordered.is_empty() {
        return fallback_placement(vehicles);
    }

    let mut placements = BTreeMap::new();
    let mut index = 0usize;

    // Seed one vehicle per demanded location, most active first,
    // truncated when the fleet runs out
    for &loc in &ordered {
        if index >= vehicles.len() {
            break;
        }
        placements.insert(vehicles[index].id, loc);
        index += 1;
    }

    if index < vehicles.len() {
        let rest = proportional_placement(&vehicles[index..], flow, config);
        placements.extend(rest);
    }
    placements
}

fn fallback_placement(vehicles: &[Vehicle]) -> BTreeMap<VehicleId, LocationId> {
    // No flow data at all: keep vehicles where they are, or park the
    // unplaced ones at the first placed vehicle's location.
    let default = vehicles
        .iter()
        .find_map(|v| v.current_location)
        .unwrap_or_else(|| LocationId::new(1));
    vehicles
        .iter()
        .map(|v| (v.id, v.current_location.unwrap_or(default)))
        .collect()
}

/// Quality report: spread, coverage of demand, and a relocation cost
/// estimate for the deficits the placement leaves behind.
fn assess_quality(
    placements: &BTreeMap<VehicleId, LocationId>,
    flow: &FlowStats,
    oracle: &DistanceOracle,
    cost_model: &CostModel,
    fleet_size: usize,
) -> PlacementQuality {
    let mut counts: BTreeMap<LocationId, usize> = BTreeMap::new();
    for loc in placements.values() {
        *counts.entry(*loc).or_insert(0) += 1;
    }

    let max_at_one = counts.values().copied().max().unwrap_or(0);
    let max_concentration = if fleet_size > 0 {
        max_at_one as f64 / fleet_size as f64
    } else {
        0.0
    };

    let total_starts: u64 = flow.starts.values().map(|&n| n as u64).sum();
    let covered: u64 = flow
        .starts
        .iter()
        .filter(|(loc, _)| counts.contains_key(loc))
        .map(|(_, &n)| n as u64)
        .sum();
    let demand_coverage = if total_starts > 0 {
        covered as f64 / total_starts as f64
    } else {
        1.0
    };

    // For every under-supplied start location, price the cheapest inbound
    // relocation from a location with spare vehicles.
    let mut estimated = 0.0;
    for (&loc, &starts) in &flow.starts {
        let here = counts.get(&loc).copied().unwrap_or(0) as i64;
        let deficit = starts as i64 - here;
        if deficit <= 0 {
            continue;
        }
        let mut cheapest = f64::INFINITY;
        for (&source, &count) in &counts {
            if source == loc {
                continue;
            }
            let source_starts = flow.starts.get(&source).copied().unwrap_or(0) as i64;
            if (count as i64) <= source_starts {
                continue; // no spare vehicles there
            }
            if let Some(conn) = oracle.lookup(source, loc) {
                cheapest = cheapest.min(cost_model.relocation_cost(&conn));
            }
        }
        let per_move = if cheapest.is_finite() {
            cheapest
        } else {
            FALLBACK_RELOCATION_ESTIMATE
        };
        estimated += deficit as f64 * per_move;
    }

    PlacementQuality {
        locations_used: counts.len(),
        max_concentration,
        demand_coverage,
        estimated_relocation_cost: estimated,
    }
}

/// Write a placement back onto the vehicle records before an assignment run.
pub fn apply_placement(vehicles: &mut [Vehicle], result: &PlacementResult) {
    for vehicle in vehicles {
        if let Some(loc) = result.placements.get(&vehicle.id) {
            vehicle.current_location = Some(*loc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use fleet_core::config::PlacementOptions;
    use fleet_core::units::{Kilometers, Minutes};
    use fleet_core::{
        LocationRelation, RelationId, RouteId, Segment, SegmentId,
    };

    fn dt(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn route(id: i64, from: i64, to: i64, d: u32) -> Route {
        Route {
            id: RouteId::new(id),
            start_time: dt(d, 8),
            end_time: dt(d, 16),
            distance_km: 200.0,
            segments: vec![Segment {
                id: SegmentId::new(id),
                route_id: RouteId::new(id),
                seq: 1,
                start_location: LocationId::new(from),
                end_location: LocationId::new(to),
                start_time: dt(d, 8),
                end_time: dt(d, 16),
                relation_id: RelationId::new(1),
            }],
        }
    }

    fn fleet(n: i64) -> Vec<Vehicle> {
        (1..=n)
            .map(|id| Vehicle {
                id: VehicleId::new(id),
                registration: format!("WX {id}"),
                brand: "DAF".into(),
                service_interval_km: 30_000,
                leasing_start_km: 0,
                leasing_limit_km: 100_000,
                lease_start: dt(1, 0),
                lease_end: dt(1, 0) + Duration::days(365),
                current_odometer_km: 0,
                current_location: None,
            })
            .collect()
    }

    fn empty_oracle() -> DistanceOracle {
        DistanceOracle::new(&[], false, true)
    }

    #[test]
    fn flow_counts_starts_and_ends_within_horizon() {
        let routes = vec![
            route(1, 1, 2, 2),
            route(2, 1, 3, 3),
            route(3, 2, 1, 4),
            route(4, 1, 2, 28), // outside a 14-day horizon
        ];
        let flow = analyze_flow(&routes, 14);
        assert_eq!(flow.starts[&LocationId::new(1)], 2);
        assert_eq!(flow.ends[&LocationId::new(2)], 1);
        assert_eq!(flow.net_demand(LocationId::new(1)), 1);
        assert_eq!(flow.activity(LocationId::new(2)), 2);
        assert_eq!(flow.locations_by_activity()[0], LocationId::new(1));
    }

    #[test]
    fn proportional_respects_concentration_cap() {
        // All demand at location 1; cap of 30% over 10 vehicles = 3 there
        let routes: Vec<Route> = (1..=20).map(|i| route(i, 1, 2, 2)).collect();
        let vehicles = fleet(10);
        let config = OptimizerConfig {
            placement: PlacementOptions {
                strategy: PlacementStrategy::Proportional,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = compute_placement(&vehicles, &routes, &empty_oracle(), &config);
        let at_one = result
            .placements
            .values()
            .filter(|&&l| l == LocationId::new(1))
            .count();
        // quota capped at 3, leftovers pile back onto the top location
        assert!(at_one >= 3);
        assert_eq!(result.placements.len(), 10);
    }

    #[test]
    fn coverage_first_seeds_every_demanded_location() {
        let routes = vec![
            route(1, 1, 9, 2),
            route(2, 1, 9, 2),
            route(3, 2, 9, 2),
            route(4, 3, 9, 3),
        ];
        let vehicles = fleet(5);
        let config = OptimizerConfig {
            placement: PlacementOptions {
                strategy: PlacementStrategy::CoverageFirst,
                ..Default::default()
            },
            ..Default::default()
        };
        let result = compute_placement(&vehicles, &routes, &empty_oracle(), &config);
        let placed: std::collections::HashSet<_> = result.placements.values().copied().collect();
        for loc in [1, 2, 3, 9] {
            assert!(placed.contains(&LocationId::new(loc)), "location {loc} not seeded");
        }
    }

    #[test]
    fn cost_matrix_prefers_undersupplied_over_oversupplied() {
        // Locations 1 and 2 are equally active, but routes drain 1 and
        // flood 2: vehicles should start where routes depart.
        let routes = vec![route(1, 1, 2, 2), route(2, 1, 2, 2), route(3, 1, 2, 3)];
        let vehicles = fleet(3);
        let config = OptimizerConfig::default();
        let result = compute_placement(&vehicles, &routes, &empty_oracle(), &config);
        let at_one = result
            .placements
            .values()
            .filter(|&&l| l == LocationId::new(1))
            .count();
        assert_eq!(at_one, 3, "expected the fleet at the departure location");
    }

    #[test]
    fn cost_matrix_spreads_once_soft_cap_bites() {
        let routes: Vec<Route> = (1..=10)
            .map(|i| route(i, 1, 2, 2))
            .chain((11..=12).map(|i| route(i, 3, 2, 2)))
            .collect();
        let vehicles = fleet(20);
        let config = OptimizerConfig {
            placement: PlacementOptions {
                max_vehicles_per_location: Some(4),
                ..Default::default()
            },
            ..Default::default()
        };
        let result = compute_placement(&vehicles, &routes, &empty_oracle(), &config);
        let mut counts: BTreeMap<LocationId, usize> = BTreeMap::new();
        for loc in result.placements.values() {
            *counts.entry(*loc).or_insert(0) += 1;
        }
        // The repellent keeps every location at or barely above its cap
        // until all candidates are saturated.
        assert!(counts.values().all(|&c| c <= 14), "counts: {counts:?}");
        assert!(counts.len() >= 2);
    }

    #[test]
    fn quality_reports_coverage_and_deficit_estimate() {
        let relations = vec![LocationRelation {
            id: RelationId::new(1),
            from: LocationId::new(1),
            to: LocationId::new(2),
            distance_km: Kilometers(50.0),
            travel: Minutes(60.0),
        }];
        let oracle = DistanceOracle::new(&relations, false, true);
        let routes = vec![route(1, 1, 2, 2), route(2, 2, 1, 2), route(3, 2, 1, 3)];
        let vehicles = fleet(2);
        let config = OptimizerConfig::default();
        let result = compute_placement(&vehicles, &routes, &oracle, &config);
        assert!(result.quality.locations_used >= 1);
        assert!(result.quality.demand_coverage > 0.0);
        assert!(result.quality.max_concentration <= 1.0);
    }

    #[test]
    fn apply_placement_updates_vehicle_locations() {
        let mut vehicles = fleet(2);
        let mut placements = BTreeMap::new();
        placements.insert(VehicleId::new(1), LocationId::new(7));
        let result = PlacementResult {
            placements,
            demand: BTreeMap::new(),
            quality: PlacementQuality {
                locations_used: 1,
                max_concentration: 0.5,
                demand_coverage: 1.0,
                estimated_relocation_cost: 0.0,
            },
        };
        apply_placement(&mut vehicles, &result);
        assert_eq!(vehicles[0].current_location, Some(LocationId::new(7)));
        assert_eq!(vehicles[1].current_location, None);
    }
}
