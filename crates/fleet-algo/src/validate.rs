//! Pre-run input validation.
//!
//! Runs once, before any state exists. A failure here aborts the run with
//! `FleetError::Validation` — malformed input never reaches the driver.

use std::collections::HashSet;

use fleet_core::{FleetError, FleetResult, Location, LocationRelation, Route, Vehicle};

/// Check referential integrity and basic sanity of the loaded data set.
pub fn validate_inputs(
    vehicles: &[Vehicle],
    locations: &[Location],
    relations: &[LocationRelation],
    routes: &[Route],
) -> FleetResult<()> {
    let known: HashSet<i64> = locations.iter().map(|l| l.id.value()).collect();
    let mut issues: Vec<String> = Vec::new();

    for rel in relations {
        if !known.contains(&rel.from.value()) || !known.contains(&rel.to.value()) {
            issues.push(format!(
                "relation {} references unknown location ({} -> {})",
                rel.id.value(),
                rel.from,
                rel.to
            ));
        }
        if rel.distance_km.0 < 0.0 || rel.travel.0 < 0.0 {
            issues.push(format!("relation {} has negative weights", rel.id.value()));
        }
    }

    let mut seen_vehicles = HashSet::new();
    for vehicle in vehicles {
        if !seen_vehicles.insert(vehicle.id) {
            issues.push(format!("duplicate vehicle id {}", vehicle.id));
        }
        if let Some(loc) = vehicle.current_location {
            if !known.contains(&loc.value()) {
                issues.push(format!("vehicle {} placed at unknown location {}", vehicle.id, loc));
            }
        }
        if vehicle.current_odometer_km < vehicle.leasing_start_km {
            issues.push(format!(
                "vehicle {} odometer {} below lease start reading {}",
                vehicle.id, vehicle.current_odometer_km, vehicle.leasing_start_km
            ));
        }
        if vehicle.lease_end <= vehicle.lease_start {
            issues.push(format!("vehicle {} has an inverted lease window", vehicle.id));
        }
    }

    let mut seen_routes = HashSet::new();
    for route in routes {
        if !seen_routes.insert(route.id) {
            issues.push(format!("duplicate route id {}", route.id));
        }
        if route.segments.is_empty() {
            issues.push(format!("route {} has no segments", route.id));
            continue;
        }
        if route.distance_km <= 0.0 {
            issues.push(format!("route {} has non-positive distance", route.id));
        }
        if route.end_time <= route.start_time {
            issues.push(format!("route {} has an inverted time window", route.id));
        }
        for seg in &route.segments {
            if !known.contains(&seg.start_location.value())
                || !known.contains(&seg.end_location.value())
            {
                issues.push(format!(
                    "route {} segment {} references unknown location",
                    route.id,
                    seg.id.value()
                ));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(FleetError::Validation(issues.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use fleet_core::units::{Kilometers, Minutes};
    use fleet_core::{LocationId, RelationId, RouteId, Segment, SegmentId, VehicleId};

    fn dt(d: u32, h: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 2, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    fn location(id: i64) -> Location {
        Location {
            id: LocationId::new(id),
            name: format!("L{id}"),
            lat: 52.0,
            lon: 21.0,
            is_hub: false,
        }
    }

    fn vehicle(id: i64, at: Option<i64>) -> Vehicle {
        Vehicle {
            id: VehicleId::new(id),
            registration: format!("WX {id}"),
            brand: "DAF".into(),
            service_interval_km: 30_000,
            leasing_start_km: 0,
            leasing_limit_km: 100_000,
            lease_start: dt(1, 0),
            lease_end: dt(1, 0) + chrono::Duration::days(365),
            current_odometer_km: 10,
            current_location: at.map(LocationId::new),
        }
    }

    fn route(id: i64, from: i64, to: i64) -> Route {
        Route {
            id: RouteId::new(id),
            start_time: dt(2, 8),
            end_time: dt(2, 12),
            distance_km: 100.0,
            segments: vec![Segment {
                id: SegmentId::new(id),
                route_id: RouteId::new(id),
                seq: 1,
                start_location: LocationId::new(from),
                end_location: LocationId::new(to),
                start_time: dt(2, 8),
                end_time: dt(2, 12),
                relation_id: RelationId::new(1),
            }],
        }
    }

    #[test]
    fn clean_inputs_pass() {
        let locations = vec![location(1), location(2)];
        let relations = vec![LocationRelation {
            id: RelationId::new(1),
            from: LocationId::new(1),
            to: LocationId::new(2),
            distance_km: Kilometers(50.0),
            travel: Minutes(60.0),
        }];
        let vehicles = vec![vehicle(1, Some(1)), vehicle(2, None)];
        let routes = vec![route(1, 1, 2)];
        assert!(validate_inputs(&vehicles, &locations, &relations, &routes).is_ok());
    }

    #[test]
    fn unknown_foreign_keys_are_reported() {
        let locations = vec![location(1)];
        let vehicles = vec![vehicle(1, Some(9))];
        let routes = vec![route(1, 1, 9)];
        let err = validate_inputs(&vehicles, &locations, &[], &routes).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown location"));
    }

    #[test]
    fn segmentless_route_is_invalid() {
        let locations = vec![location(1)];
        let mut r = route(1, 1, 1);
        r.segments.clear();
        let err = validate_inputs(&[], &locations, &[], &[r]).unwrap_err();
        assert!(err.to_string().contains("no segments"));
    }
}
