//! Look-ahead chain scoring.
//!
//! When two candidates are close on immediate cost, the driver asks what
//! each one could do *next*: a candidate that ends a route near tomorrow's
//! departures is worth more than one that strands the vehicle. The scorer
//! simulates the post-route position on a lightweight overlay — location,
//! availability and kilometre counters only, never a full state clone — and
//! scores the reachable future routes.
//!
//! The swap policy is deliberately not enforced in this forward scan: it
//! exists to limit *executed* relocations, not hypothetical ones.

use chrono::{Duration, NaiveDateTime};

use fleet_core::config::{AssignmentOptions, ServicePolicy};
use fleet_core::{LocationId, Route, VehicleState};

use crate::costs::CostModel;
use crate::oracle::DistanceOracle;

/// Hypothetical vehicle position after completing a route.
#[derive(Debug, Clone, Copy)]
struct Overlay {
    location: LocationId,
    available_from: NaiveDateTime,
    km_since_service: i64,
    km_this_lease_year: i64,
    lifetime_km: i64,
    annual_limit_km: i64,
    service_interval_km: i64,
    lifetime_cap_km: Option<i64>,
}

impl Overlay {
    fn after_route(state: &VehicleState, route: &Route) -> Option<Overlay> {
        let end = route.end_location()?;
        let km = route.distance_km as i64;
        Some(Overlay {
            location: end,
            available_from: route.end_time,
            km_since_service: state.km_since_service + km,
            km_this_lease_year: state.km_this_lease_year + km,
            lifetime_km: state.lifetime_km + km,
            annual_limit_km: state.annual_limit_km,
            service_interval_km: state.service_interval_km,
            lifetime_cap_km: state.lifetime_cap_km,
        })
    }

    /// Reduced feasibility: availability (with a pending-service extension),
    /// reachability, lifetime cap. Returns the future assignment's cost.
    fn cost_for(
        &self,
        next: &Route,
        oracle: &DistanceOracle,
        cost_model: &CostModel,
        service: &ServicePolicy,
    ) -> Option<f64> {
        let start = next.start_location()?;
        if next.distance_km <= 0.0 || next.end_time <= next.start_time {
            return None;
        }

        let effective = if self.km_since_service > self.service_interval_km + service.service_tolerance_km
        {
            self.available_from + Duration::hours(service.service_duration_hours)
        } else {
            self.available_from
        };
        if effective > next.start_time {
            return None;
        }

        let relocation = if self.location != start {
            let conn = oracle.lookup(self.location, start)?;
            if effective + conn.travel.to_duration() > next.start_time {
                return None;
            }
            Some(conn)
        } else {
            None
        };

        if let Some(cap) = self.lifetime_cap_km {
            let reloc_km = relocation.map(|c| c.distance_km.whole()).unwrap_or(0);
            if self.lifetime_km + next.distance_km as i64 + reloc_km > cap {
                return None;
            }
        }

        Some(cost_model.overlay_cost(
            self.km_this_lease_year,
            self.annual_limit_km,
            self.km_since_service,
            self.service_interval_km,
            next,
            relocation.as_ref(),
        ))
    }
}

/// Score the future opportunities a candidate opens by taking `route`.
///
/// Scans at most `max_lookahead_routes` upcoming routes, or until
/// `route.end_time + look_ahead_days`, whichever comes first. Each feasible
/// future route scores `1000 / (cost + 100)`; the best `chain_depth` scores
/// are summed with geometrically decaying weights.
pub fn chain_score(
    state: &VehicleState,
    route: &Route,
    routes: &[Route],
    route_index: usize,
    oracle: &DistanceOracle,
    cost_model: &CostModel,
    options: &AssignmentOptions,
    service: &ServicePolicy,
) -> f64 {
    if options.chain_depth == 0 || route_index + 1 >= routes.len() {
        return 0.0;
    }
    let overlay = match Overlay::after_route(state, route) {
        Some(o) => o,
        None => return 0.0,
    };

    let horizon = route.end_time + Duration::days(options.look_ahead_days);
    let mut scores: Vec<(f64, i64)> = Vec::new();

    for next in routes[route_index + 1..].iter().take(options.max_lookahead_routes) {
        if next.start_time > horizon {
            break;
        }
        if let Some(cost) = overlay.cost_for(next, oracle, cost_model, service) {
            scores.push((1000.0 / (cost + 100.0), next.id.value()));
        }
    }

    // Best opportunities first; route id keeps equal scores deterministic
    scores.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    scores
        .iter()
        .take(options.chain_depth)
        .enumerate()
        .map(|(i, (score, _))| score * 0.5_f64.powi(i as i32))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use fleet_core::config::CostsConfig;
    use fleet_core::units::{Kilometers, Minutes};
    use fleet_core::{
        LocationRelation, RelationId, RouteId, Segment, SegmentId, Vehicle, VehicleId,
    };

    fn dt(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn route(id: i64, from: i64, to: i64, d: u32, start_h: u32, end_h: u32, km: f64) -> Route {
        Route {
            id: RouteId::new(id),
            start_time: dt(d, start_h),
            end_time: dt(d, end_h),
            distance_km: km,
            segments: vec![Segment {
                id: SegmentId::new(id),
                route_id: RouteId::new(id),
                seq: 1,
                start_location: LocationId::new(from),
                end_location: LocationId::new(to),
                start_time: dt(d, start_h),
                end_time: dt(d, end_h),
                relation_id: RelationId::new(1),
            }],
        }
    }

    fn state_at(loc: i64) -> VehicleState {
        let vehicle = Vehicle {
            id: VehicleId::new(1),
            registration: "R".into(),
            brand: "Volvo".into(),
            service_interval_km: 30_000,
            leasing_start_km: 0,
            leasing_limit_km: 100_000,
            lease_start: dt(1, 0),
            lease_end: dt(1, 0) + Duration::days(365),
            current_odometer_km: 0,
            current_location: Some(LocationId::new(loc)),
        };
        VehicleState::from_vehicle(&vehicle, dt(1, 0))
    }

    fn cost_model() -> CostModel {
        CostModel::new(CostsConfig::default(), ServicePolicy::default())
    }

    fn options(depth: usize) -> AssignmentOptions {
        AssignmentOptions {
            chain_depth: depth,
            look_ahead_days: 7,
            max_lookahead_routes: 50,
            ..Default::default()
        }
    }

    #[test]
    fn chainable_followup_scores_positive() {
        // Route 1 ends at L2; route 2 departs L2 next day: perfect chain.
        let routes = vec![
            route(1, 1, 2, 2, 8, 16, 300.0),
            route(2, 2, 1, 3, 8, 16, 300.0),
        ];
        let oracle = DistanceOracle::new(&[], false, true);
        let score = chain_score(
            &state_at(1),
            &routes[0],
            &routes,
            0,
            &oracle,
            &cost_model(),
            &options(3),
            &ServicePolicy::default(),
        );
        // Zero-cost follow-up: 1000 / (0 + 100) = 10
        assert!((score - 10.0).abs() < 1e-9);
    }

    #[test]
    fn unreachable_followups_score_zero() {
        let routes = vec![
            route(1, 1, 2, 2, 8, 16, 300.0),
            route(2, 9, 1, 3, 8, 16, 300.0), // no relation to L9
        ];
        let oracle = DistanceOracle::new(&[], false, true);
        let score = chain_score(
            &state_at(1),
            &routes[0],
            &routes,
            0,
            &oracle,
            &cost_model(),
            &options(3),
            &ServicePolicy::default(),
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn horizon_cuts_off_distant_routes() {
        let mut far = route(2, 2, 1, 2, 8, 16, 300.0);
        far.start_time = dt(2, 16) + Duration::days(30);
        far.end_time = far.start_time + Duration::hours(8);
        far.segments[0].start_time = far.start_time;
        far.segments[0].end_time = far.end_time;
        let routes = vec![route(1, 1, 2, 2, 8, 16, 300.0), far];
        let oracle = DistanceOracle::new(&[], false, true);
        let score = chain_score(
            &state_at(1),
            &routes[0],
            &routes,
            0,
            &oracle,
            &cost_model(),
            &options(3),
            &ServicePolicy::default(),
        );
        assert_eq!(score, 0.0);
    }

    #[test]
    fn deeper_chains_decay_geometrically() {
        // Three identical zero-cost follow-ups from L2
        let routes = vec![
            route(1, 1, 2, 2, 8, 10, 300.0),
            route(2, 2, 2, 3, 8, 10, 100.0),
            route(3, 2, 2, 4, 8, 10, 100.0),
            route(4, 2, 2, 5, 8, 10, 100.0),
        ];
        let oracle = DistanceOracle::new(&[], false, true);
        let score = chain_score(
            &state_at(1),
            &routes[0],
            &routes,
            0,
            &oracle,
            &cost_model(),
            &options(3),
            &ServicePolicy::default(),
        );
        // 10 + 5 + 2.5
        assert!((score - 17.5).abs() < 1e-9);
    }

    #[test]
    fn relocation_in_chain_lowers_the_score() {
        let relations = vec![LocationRelation {
            id: RelationId::new(1),
            from: LocationId::new(2),
            to: LocationId::new(3),
            distance_km: Kilometers(100.0),
            travel: Minutes(120.0),
        }];
        let oracle = DistanceOracle::new(&relations, false, true);
        let direct = vec![
            route(1, 1, 2, 2, 8, 10, 300.0),
            route(2, 2, 1, 3, 8, 10, 100.0),
        ];
        let relocated = vec![
            route(1, 1, 2, 2, 8, 10, 300.0),
            route(2, 3, 1, 3, 8, 10, 100.0),
        ];
        let opts = options(3);
        let svc = ServicePolicy::default();
        let cm = cost_model();
        let s_direct = chain_score(&state_at(1), &direct[0], &direct, 0, &oracle, &cm, &opts, &svc);
        let s_reloc =
            chain_score(&state_at(1), &relocated[0], &relocated, 0, &oracle, &cm, &opts, &svc);
        assert!(s_direct > s_reloc);
        assert!(s_reloc > 0.0);
    }

}
