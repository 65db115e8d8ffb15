//! # fleet-io: Data Source Adapters
//!
//! The optimization core works on in-memory domain objects; this crate
//! loads them and persists results. Two backends implement the same
//! [`DataSource`] capability:
//!
//! - [`CsvStore`]: the six-file tabular set (`locations`,
//!   `locations_relations`, `vehicles`, `routes`, `segments`, plus the
//!   placement output), with JSON run manifests standing in for run rows.
//! - [`SqliteStore`]: an embedded relational backend with a bounded
//!   connection pool and transactional result persistence.
//!
//! Timestamps on the wire are ISO-8601 with a space separator and second
//! precision (`2024-06-01 08:30:00`); `Current_location_id` may be the
//! literal `N/A` for an unplaced vehicle.

use std::collections::{BTreeMap, HashMap};

use fleet_core::{
    Assignment, FleetResult, Location, LocationId, LocationRelation, Route, RunStats, Vehicle,
    VehicleId, VehicleState,
};

pub mod csv_store;
pub mod pool;
pub mod sqlite_store;

pub use csv_store::CsvStore;
pub use pool::{PooledConnection, SqlitePool};
pub use sqlite_store::SqliteStore;

/// Everything one optimization run reads.
#[derive(Debug, Clone)]
pub struct DataSet {
    pub vehicles: Vec<Vehicle>,
    pub locations: Vec<Location>,
    pub relations: Vec<LocationRelation>,
    /// Pending routes, already in timeline order.
    pub routes: Vec<Route>,
}

/// Directed lookup map over the loaded relations. Reverse direction falls
/// back to the forward entry inside the distance oracle, not here.
pub fn relation_lookup(
    relations: &[LocationRelation],
) -> HashMap<(LocationId, LocationId), LocationRelation> {
    relations.iter().map(|r| ((r.from, r.to), r.clone())).collect()
}

/// Two-backend polymorphism: load the world, track runs, persist results.
pub trait DataSource {
    fn load_vehicles(&mut self) -> FleetResult<Vec<Vehicle>>;
    fn load_locations(&mut self) -> FleetResult<Vec<Location>>;
    fn load_relations(&mut self) -> FleetResult<Vec<LocationRelation>>;
    /// Routes with the given status, sorted by `(start_time, start_location)`.
    /// The tabular backend has no status column and treats every route as
    /// pending.
    fn load_routes(&mut self, status: &str) -> FleetResult<Vec<Route>>;

    fn load_all(&mut self) -> FleetResult<DataSet> {
        Ok(DataSet {
            vehicles: self.load_vehicles()?,
            locations: self.load_locations()?,
            relations: self.load_relations()?,
            routes: self.load_routes("pending")?,
        })
    }

    /// Register a run and return its id.
    fn start_run(&mut self, config_json: &serde_json::Value) -> FleetResult<i64>;
    /// Close a run with its final counters (or a failure note).
    fn complete_run(&mut self, run_id: i64, stats: &RunStats, error: Option<&str>)
        -> FleetResult<()>;
    /// Persist the full assignment set and terminal vehicle states.
    /// All-or-nothing: a failure leaves no partial rows behind.
    fn save_assignments(
        &mut self,
        run_id: i64,
        assignments: &[Assignment],
        states: &BTreeMap<VehicleId, VehicleState>,
    ) -> FleetResult<()>;
    /// Write a placement back to the vehicle records.
    fn update_vehicle_locations(
        &mut self,
        mapping: &BTreeMap<VehicleId, LocationId>,
    ) -> FleetResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::units::{Kilometers, Minutes};
    use fleet_core::RelationId;

    #[test]
    fn lookup_is_directed() {
        let relations = vec![LocationRelation {
            id: RelationId::new(1),
            from: LocationId::new(1),
            to: LocationId::new(2),
            distance_km: Kilometers(10.0),
            travel: Minutes(12.0),
        }];
        let lookup = relation_lookup(&relations);
        assert!(lookup.contains_key(&(LocationId::new(1), LocationId::new(2))));
        assert!(!lookup.contains_key(&(LocationId::new(2), LocationId::new(1))));
    }
}
