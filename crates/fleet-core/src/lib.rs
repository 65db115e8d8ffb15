//! # fleet-core: Fleet Optimization Domain Model
//!
//! Fundamental data structures for the fleet optimizer: locations and the
//! relation network between them, vehicles with their lease contracts,
//! routes with their segments, and the mutable per-vehicle simulation state.
//!
//! ## Design Philosophy
//!
//! - **Newtype ids** ([`LocationId`], [`VehicleId`], [`RouteId`], ...) make
//!   it impossible to index a vehicle map with a route id.
//! - **Static entities are immutable** through a run: [`Location`],
//!   [`LocationRelation`], [`Vehicle`] and [`Route`] are created at load
//!   time and never change. All mutation happens on [`VehicleState`],
//!   which the assignment driver owns exclusively.
//! - **Time-unit discipline**: relation travel times are [`Minutes`];
//!   conversion to hours happens only through [`Minutes::to_hours`] at
//!   cost-computation boundaries (see [`units`]).
//!
//! ## Derived lease attributes
//!
//! A `leasing_limit_km` above 200 000 denotes a lifetime-cap contract with a
//! synthetic 150 000 km annual allowance; otherwise the limit is annual and
//! no lifetime cap applies. See [`Vehicle::annual_limit_km`] and
//! [`Vehicle::lifetime_cap_km`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub mod config;
pub mod error;
pub mod state;
pub mod units;

pub use config::{
    AssignmentOptions, AssignmentStrategy, CostsConfig, OptimizerConfig, PerformanceOptions,
    PlacementOptions, PlacementStrategy, ServicePolicy, SwapPolicy,
};
pub use error::{FleetError, FleetResult};
pub use state::{Assignment, PlacementQuality, PlacementResult, RelocationLeg, RunStats, VehicleState};
pub use units::{Kilometers, Minutes};

/// Annual allowance substituted for lifetime-cap contracts.
pub const SYNTHETIC_ANNUAL_LIMIT_KM: i64 = 150_000;

/// A `leasing_limit_km` above this threshold is a lifetime total, not annual.
pub const LIFETIME_LIMIT_THRESHOLD_KM: i64 = 200_000;

// Newtype wrappers for ids for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(i64);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(i64);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(i64);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(i64);
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(i64);

impl LocationId {
    #[inline]
    pub fn new(value: i64) -> Self {
        LocationId(value)
    }
    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl RelationId {
    #[inline]
    pub fn new(value: i64) -> Self {
        RelationId(value)
    }
    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl VehicleId {
    #[inline]
    pub fn new(value: i64) -> Self {
        VehicleId(value)
    }
    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl RouteId {
    #[inline]
    pub fn new(value: i64) -> Self {
        RouteId(value)
    }
    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl SegmentId {
    #[inline]
    pub fn new(value: i64) -> Self {
        SegmentId(value)
    }
    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Display for RouteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A depot, terminal or customer site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub is_hub: bool,
}

/// A directed edge between two locations with distance and travel time.
///
/// Edges are treated as bidirectional with identical weights unless the data
/// carries both directions separately. `travel` is in minutes; see [`units`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationRelation {
    pub id: RelationId,
    pub from: LocationId,
    pub to: LocationId,
    pub distance_km: Kilometers,
    pub travel: Minutes,
}

/// A vehicle with its lease contract, immutable through a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub registration: String,
    pub brand: String,
    pub service_interval_km: i64,
    pub leasing_start_km: i64,
    /// Annual allowance, or lifetime total when above
    /// [`LIFETIME_LIMIT_THRESHOLD_KM`].
    pub leasing_limit_km: i64,
    pub lease_start: NaiveDateTime,
    pub lease_end: NaiveDateTime,
    pub current_odometer_km: i64,
    /// `None` for an unplaced vehicle (`N/A` in the tabular source).
    pub current_location: Option<LocationId>,
}

impl Vehicle {
    /// Whether `leasing_limit_km` is a lifetime total rather than annual.
    pub fn has_lifetime_cap(&self) -> bool {
        self.leasing_limit_km > LIFETIME_LIMIT_THRESHOLD_KM
    }

    /// Annual kilometre allowance for the current lease year.
    pub fn annual_limit_km(&self) -> i64 {
        if self.has_lifetime_cap() {
            SYNTHETIC_ANNUAL_LIMIT_KM
        } else {
            self.leasing_limit_km
        }
    }

    /// Lifetime contract cap, when one applies.
    pub fn lifetime_cap_km(&self) -> Option<i64> {
        if self.has_lifetime_cap() {
            Some(self.leasing_limit_km)
        } else {
            None
        }
    }
}

/// One leg of a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub route_id: RouteId,
    pub seq: i64,
    pub start_location: LocationId,
    pub end_location: LocationId,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub relation_id: RelationId,
}

/// An atomic delivery: fixed start/end times, total distance, and an
/// ordered segment list. Routes are never decomposed for partial assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub distance_km: f64,
    pub segments: Vec<Segment>,
}

impl Route {
    /// Starting location: the first segment's start.
    pub fn start_location(&self) -> Option<LocationId> {
        self.segments.first().map(|s| s.start_location)
    }

    /// Ending location: the last segment's end.
    pub fn end_location(&self) -> Option<LocationId> {
        self.segments.last().map(|s| s.end_location)
    }

    pub fn is_loop(&self) -> bool {
        self.start_location().is_some() && self.start_location() == self.end_location()
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.end_time - self.start_time).num_seconds()
    }
}

/// Total order for the assignment timeline: `(start_time, start_location_id)`.
pub fn sort_routes(routes: &mut [Route]) {
    routes.sort_by(|a, b| {
        a.start_time.cmp(&b.start_time).then_with(|| {
            let la = a.start_location().map(|l| l.value()).unwrap_or(i64::MAX);
            let lb = b.start_location().map(|l| l.value()).unwrap_or(i64::MAX);
            la.cmp(&lb)
        })
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn vehicle_with_limit(limit: i64) -> Vehicle {
        Vehicle {
            id: VehicleId::new(1),
            registration: "WX 1234".into(),
            brand: "DAF".into(),
            service_interval_km: 30_000,
            leasing_start_km: 10_000,
            leasing_limit_km: limit,
            lease_start: dt(1, 0),
            lease_end: dt(1, 0) + chrono::Duration::days(365),
            current_odometer_km: 12_000,
            current_location: Some(LocationId::new(1)),
        }
    }

    #[test]
    fn annual_limit_is_taken_verbatim_below_threshold() {
        let v = vehicle_with_limit(120_000);
        assert!(!v.has_lifetime_cap());
        assert_eq!(v.annual_limit_km(), 120_000);
        assert_eq!(v.lifetime_cap_km(), None);
    }

    #[test]
    fn lifetime_limit_gets_synthetic_annual() {
        let v = vehicle_with_limit(450_000);
        assert!(v.has_lifetime_cap());
        assert_eq!(v.annual_limit_km(), SYNTHETIC_ANNUAL_LIMIT_KM);
        assert_eq!(v.lifetime_cap_km(), Some(450_000));
    }

    #[test]
    fn route_endpoints_come_from_segments() {
        let seg = |seq, from, to| Segment {
            id: SegmentId::new(seq),
            route_id: RouteId::new(7),
            seq,
            start_location: LocationId::new(from),
            end_location: LocationId::new(to),
            start_time: dt(2, 8),
            end_time: dt(2, 12),
            relation_id: RelationId::new(1),
        };
        let route = Route {
            id: RouteId::new(7),
            start_time: dt(2, 8),
            end_time: dt(2, 12),
            distance_km: 240.0,
            segments: vec![seg(1, 10, 20), seg(2, 20, 30)],
        };
        assert_eq!(route.start_location(), Some(LocationId::new(10)));
        assert_eq!(route.end_location(), Some(LocationId::new(30)));
        assert!(!route.is_loop());
        assert_eq!(route.duration_seconds(), 4 * 3600);
    }

    #[test]
    fn routes_sort_by_time_then_start_location() {
        let mk = |id, day, hour, loc| Route {
            id: RouteId::new(id),
            start_time: dt(day, hour),
            end_time: dt(day, hour + 2),
            distance_km: 100.0,
            segments: vec![Segment {
                id: SegmentId::new(id),
                route_id: RouteId::new(id),
                seq: 1,
                start_location: LocationId::new(loc),
                end_location: LocationId::new(loc + 1),
                start_time: dt(day, hour),
                end_time: dt(day, hour + 2),
                relation_id: RelationId::new(1),
            }],
        };
        let mut routes = vec![mk(3, 2, 8, 5), mk(1, 1, 8, 9), mk(2, 2, 8, 2)];
        sort_routes(&mut routes);
        let ids: Vec<i64> = routes.iter().map(|r| r.id.value()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
