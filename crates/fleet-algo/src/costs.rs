//! Monetary cost model: relocations, annual overage, service.
//!
//! Relation travel is stored in minutes; the hourly rate conversion happens
//! here and only here, through [`Minutes::to_hours`].

use fleet_core::config::{CostsConfig, ServicePolicy};
use fleet_core::{Route, VehicleState};

use crate::oracle::Connection;

/// Per-candidate cost components; the assignment record keeps the split.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CostBreakdown {
    pub relocation: f64,
    pub overage: f64,
    pub service_penalty: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.relocation + self.overage + self.service_penalty
    }
}

#[derive(Debug, Clone)]
pub struct CostModel {
    costs: CostsConfig,
    service: ServicePolicy,
}

impl CostModel {
    pub fn new(costs: CostsConfig, service: ServicePolicy) -> Self {
        CostModel { costs, service }
    }

    /// Cost of physically moving a vehicle over `conn`. The zero sentinel
    /// costs nothing.
    pub fn relocation_cost(&self, conn: &Connection) -> f64 {
        if !conn.is_move() {
            return 0.0;
        }
        self.costs.relocation_base
            + conn.distance_km.0 * self.costs.relocation_per_km
            + conn.travel.to_hours() * self.costs.relocation_per_hour
    }

    /// Overage for a projected yearly kilometre total against an annual
    /// allowance. State-level: recomputed from the full counter, never
    /// accumulated incrementally.
    pub fn overage_cost(&self, projected_annual_km: i64, annual_limit_km: i64) -> f64 {
        let over = (projected_annual_km - annual_limit_km).max(0);
        over as f64 * self.costs.overage_per_km
    }

    /// Flat amount for one scheduled service stop.
    pub fn service_cost(&self) -> f64 {
        self.service.service_cost
    }

    pub fn service_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.service.service_duration_hours)
    }

    /// Immediate cost of assigning a vehicle in `state` to `route`, given
    /// the relocation leg the feasibility check resolved (if any).
    ///
    /// Soft constraints only: service imminence and projected overage are
    /// priced, never gated.
    pub fn candidate_cost(
        &self,
        state: &VehicleState,
        route: &Route,
        relocation: Option<&Connection>,
    ) -> CostBreakdown {
        let mut breakdown = CostBreakdown::default();

        if let Some(conn) = relocation {
            breakdown.relocation = self.relocation_cost(conn);
        }

        let route_km = route.distance_km as i64;
        let projected = state.km_this_lease_year + route_km;
        breakdown.overage = self.overage_cost(projected, state.annual_limit_km);

        let projected_service = state.km_since_service + route_km;
        if projected_service > state.service_interval_km + self.service.service_tolerance_km {
            breakdown.service_penalty = self.service.service_penalty;
        }

        breakdown
    }

    /// Same pricing for the chain scorer's hypothetical overlay.
    pub fn overlay_cost(
        &self,
        km_this_lease_year: i64,
        annual_limit_km: i64,
        km_since_service: i64,
        service_interval_km: i64,
        route: &Route,
        relocation: Option<&Connection>,
    ) -> f64 {
        let mut total = 0.0;
        if let Some(conn) = relocation {
            total += self.relocation_cost(conn);
        }
        let route_km = route.distance_km as i64;
        total += self.overage_cost(km_this_lease_year + route_km, annual_limit_km);
        if km_since_service + route_km > service_interval_km + self.service.service_tolerance_km {
            total += self.service.service_penalty;
        }
        total
    }

    pub fn service_tolerance_km(&self) -> i64 {
        self.service.service_tolerance_km
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use fleet_core::units::{Kilometers, Minutes};
    use fleet_core::{LocationId, RouteId, Vehicle, VehicleId};

    fn model() -> CostModel {
        CostModel::new(CostsConfig::default(), ServicePolicy::default())
    }

    fn state(annual_km: i64, since_service: i64) -> VehicleState {
        let day0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        let vehicle = Vehicle {
            id: VehicleId::new(1),
            registration: "R".into(),
            brand: "DAF".into(),
            service_interval_km: 30_000,
            leasing_start_km: 0,
            leasing_limit_km: 100_000,
            lease_start: day0,
            lease_end: day0 + chrono::Duration::days(365),
            current_odometer_km: 0,
            current_location: Some(LocationId::new(1)),
        };
        let mut s = VehicleState::from_vehicle(&vehicle, day0);
        s.km_this_lease_year = annual_km;
        s.km_since_service = since_service;
        s
    }

    fn route(km: f64) -> Route {
        let day0 = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        Route {
            id: RouteId::new(1),
            start_time: day0.and_hms_opt(8, 0, 0).unwrap(),
            end_time: day0.and_hms_opt(16, 0, 0).unwrap(),
            distance_km: km,
            segments: vec![],
        }
    }

    #[test]
    fn relocation_cost_converts_minutes_to_hours() {
        // 50 km, 90 min: 1000 + 50*1 + 1.5*150 = 1275
        let conn = Connection {
            distance_km: Kilometers(50.0),
            travel: Minutes(90.0),
            hops: 1,
        };
        assert_eq!(model().relocation_cost(&conn), 1275.0);
    }

    #[test]
    fn zero_sentinel_costs_nothing() {
        assert_eq!(model().relocation_cost(&Connection::zero()), 0.0);
    }

    #[test]
    fn overage_only_above_limit() {
        let m = model();
        assert_eq!(m.overage_cost(99_000, 100_000), 0.0);
        assert_eq!(m.overage_cost(100_000, 100_000), 0.0);
        let over = m.overage_cost(101_000, 100_000);
        assert!((over - 920.0).abs() < 1e-9);
    }

    #[test]
    fn candidate_cost_prices_soft_constraints() {
        let m = model();
        // Projected annual 100_500 on a 100_000 limit, service far away
        let breakdown = m.candidate_cost(&state(100_000, 0), &route(500.0), None);
        assert_eq!(breakdown.relocation, 0.0);
        assert!((breakdown.overage - 460.0).abs() < 1e-9);
        assert_eq!(breakdown.service_penalty, 0.0);

        // Service imminent: 30_800 + 500 > 30_000 + 1000
        let breakdown = m.candidate_cost(&state(0, 30_800), &route(500.0), None);
        assert_eq!(breakdown.service_penalty, 500.0);
        assert_eq!(breakdown.total(), 500.0);
    }
}
