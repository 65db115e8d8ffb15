//! Embedded relational backend.
//!
//! Mirrors the upstream schema (locations, location_relations, vehicles,
//! routes, segments, algorithm_runs, assignments, vehicle_states). Result
//! persistence runs in one transaction: the complete assignment set and the
//! terminal state snapshots commit together or not at all.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Transaction};

use fleet_core::units::{Kilometers, Minutes};
use fleet_core::{
    sort_routes, Assignment, FleetError, FleetResult, Location, LocationId, LocationRelation,
    RelationId, Route, RouteId, RunStats, Segment, SegmentId, Vehicle, VehicleId, VehicleState,
};

use crate::csv_store::{format_timestamp, parse_timestamp};
use crate::pool::SqlitePool;
use crate::{CsvStore, DataSource};

fn db(err: rusqlite::Error) -> FleetError {
    FleetError::Database(err.to_string())
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS locations (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    lat REAL NOT NULL,
    long REAL NOT NULL,
    is_hub INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS location_relations (
    id INTEGER PRIMARY KEY,
    from_location_id INTEGER NOT NULL REFERENCES locations(id),
    to_location_id INTEGER NOT NULL REFERENCES locations(id),
    distance_km REAL NOT NULL,
    time_minutes REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS vehicles (
    id INTEGER PRIMARY KEY,
    registration_number TEXT NOT NULL,
    brand TEXT NOT NULL,
    service_interval_km INTEGER NOT NULL,
    leasing_start_km INTEGER NOT NULL,
    leasing_limit_km INTEGER NOT NULL,
    leasing_start_date TEXT NOT NULL,
    leasing_end_date TEXT NOT NULL,
    current_odometer_km INTEGER NOT NULL,
    current_location_id INTEGER REFERENCES locations(id)
);
CREATE TABLE IF NOT EXISTS routes (
    id INTEGER PRIMARY KEY,
    start_datetime TEXT NOT NULL,
    end_datetime TEXT NOT NULL,
    distance_km REAL NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
);
CREATE TABLE IF NOT EXISTS segments (
    id INTEGER PRIMARY KEY,
    route_id INTEGER NOT NULL REFERENCES routes(id),
    seq INTEGER NOT NULL,
    start_location_id INTEGER NOT NULL REFERENCES locations(id),
    end_location_id INTEGER NOT NULL REFERENCES locations(id),
    start_datetime TEXT NOT NULL,
    end_datetime TEXT NOT NULL,
    relation_id INTEGER
);
CREATE TABLE IF NOT EXISTS algorithm_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL DEFAULT (datetime('now')),
    completed_at TEXT,
    status TEXT NOT NULL DEFAULT 'running',
    config TEXT,
    routes_processed INTEGER,
    assignments_created INTEGER,
    total_cost REAL,
    error_message TEXT
);
CREATE TABLE IF NOT EXISTS assignments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    algorithm_run_id INTEGER NOT NULL REFERENCES algorithm_runs(id),
    route_id INTEGER NOT NULL REFERENCES routes(id),
    vehicle_id INTEGER NOT NULL REFERENCES vehicles(id),
    date TEXT NOT NULL,
    assignment_cost REAL NOT NULL,
    requires_relocation INTEGER NOT NULL,
    requires_service INTEGER NOT NULL,
    relocation_from INTEGER,
    relocation_to INTEGER,
    relocation_distance_km REAL,
    relocation_time_minutes REAL,
    overage_km INTEGER NOT NULL,
    chain_score REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS vehicle_states (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    algorithm_run_id INTEGER NOT NULL REFERENCES algorithm_runs(id),
    vehicle_id INTEGER NOT NULL REFERENCES vehicles(id),
    location_id INTEGER,
    odometer_km INTEGER NOT NULL,
    km_since_service INTEGER NOT NULL,
    km_this_lease_year INTEGER NOT NULL,
    lifetime_km INTEGER NOT NULL,
    lease_cycle_number INTEGER NOT NULL,
    total_relocations INTEGER NOT NULL,
    total_relocation_cost REAL NOT NULL,
    total_overage_cost REAL NOT NULL,
    services_done INTEGER NOT NULL,
    service_cost_accrued REAL NOT NULL,
    routes_assigned INTEGER NOT NULL
);
";

/// Summary for `GET /db/info` and the CLI `db-info` command.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbInfo {
    pub path: String,
    pub locations: i64,
    pub location_relations: i64,
    pub vehicles: i64,
    pub routes: i64,
    pub segments: i64,
    pub assignments: i64,
    pub algorithm_runs: i64,
}

/// SQLite-backed data source over a pooled database file.
pub struct SqliteStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteStore {
    /// Open (creating the schema if needed) with the given pool bounds.
    pub fn open(path: &Path, min_connections: usize, max_connections: usize) -> FleetResult<Self> {
        let pool = SqlitePool::open(path, min_connections, max_connections)?;
        {
            let conn = pool.get()?;
            conn.execute_batch(SCHEMA).map_err(db)?;
        }
        Ok(SqliteStore {
            pool,
            path: path.display().to_string(),
        })
    }

    pub fn info(&self) -> FleetResult<DbInfo> {
        let conn = self.pool.get()?;
        let count = |table: &str| -> FleetResult<i64> {
            conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get(0))
                .map_err(db)
        };
        Ok(DbInfo {
            path: self.path.clone(),
            locations: count("locations")?,
            location_relations: count("location_relations")?,
            vehicles: count("vehicles")?,
            routes: count("routes")?,
            segments: count("segments")?,
            assignments: count("assignments")?,
            algorithm_runs: count("algorithm_runs")?,
        })
    }

    /// Upsert the six-file CSV set into the database.
    pub fn import_csv(&mut self, data_dir: &Path) -> FleetResult<ImportCounts> {
        let mut csv = CsvStore::new(data_dir, data_dir.join("output"));
        let locations = csv.load_locations()?;
        let relations = csv.load_relations()?;
        let vehicles = csv.load_vehicles()?;
        let routes = csv.load_routes("pending")?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction().map_err(db)?;
        for l in &locations {
            tx.execute(
                "INSERT OR REPLACE INTO locations (id, name, lat, long, is_hub)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![l.id.value(), l.name, l.lat, l.lon, l.is_hub as i64],
            )
            .map_err(db)?;
        }
        for r in &relations {
            tx.execute(
                "INSERT OR REPLACE INTO location_relations
                 (id, from_location_id, to_location_id, distance_km, time_minutes)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    r.id.value(),
                    r.from.value(),
                    r.to.value(),
                    r.distance_km.0,
                    r.travel.0
                ],
            )
            .map_err(db)?;
        }
        for v in &vehicles {
            tx.execute(
                "INSERT OR REPLACE INTO vehicles
                 (id, registration_number, brand, service_interval_km, leasing_start_km,
                  leasing_limit_km, leasing_start_date, leasing_end_date,
                  current_odometer_km, current_location_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    v.id.value(),
                    v.registration,
                    v.brand,
                    v.service_interval_km,
                    v.leasing_start_km,
                    v.leasing_limit_km,
                    format_timestamp(v.lease_start),
                    format_timestamp(v.lease_end),
                    v.current_odometer_km,
                    v.current_location.map(|l| l.value()),
                ],
            )
            .map_err(db)?;
        }
        let mut segment_count = 0usize;
        for route in &routes {
            tx.execute(
                "INSERT OR REPLACE INTO routes (id, start_datetime, end_datetime, distance_km, status)
                 VALUES (?1, ?2, ?3, ?4, 'pending')",
                params![
                    route.id.value(),
                    format_timestamp(route.start_time),
                    format_timestamp(route.end_time),
                    route.distance_km
                ],
            )
            .map_err(db)?;
            for s in &route.segments {
                tx.execute(
                    "INSERT OR REPLACE INTO segments
                     (id, route_id, seq, start_location_id, end_location_id,
                      start_datetime, end_datetime, relation_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        s.id.value(),
                        s.route_id.value(),
                        s.seq,
                        s.start_location.value(),
                        s.end_location.value(),
                        format_timestamp(s.start_time),
                        format_timestamp(s.end_time),
                        s.relation_id.value()
                    ],
                )
                .map_err(db)?;
                segment_count += 1;
            }
        }
        tx.commit().map_err(db)?;

        Ok(ImportCounts {
            locations: locations.len(),
            relations: relations.len(),
            vehicles: vehicles.len(),
            routes: routes.len(),
            segments: segment_count,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImportCounts {
    pub locations: usize,
    pub relations: usize,
    pub vehicles: usize,
    pub routes: usize,
    pub segments: usize,
}

fn insert_assignment(tx: &Transaction<'_>, run_id: i64, a: &Assignment) -> FleetResult<()> {
    let (from, to, km, minutes) = match &a.relocation {
        Some(leg) => (
            Some(leg.from.value()),
            Some(leg.to.value()),
            Some(leg.distance_km.0),
            Some(leg.travel.0),
        ),
        None => (None, None, None, None),
    };
    tx.execute(
        "INSERT INTO assignments
         (algorithm_run_id, route_id, vehicle_id, date, assignment_cost,
          requires_relocation, requires_service, relocation_from, relocation_to,
          relocation_distance_km, relocation_time_minutes, overage_km, chain_score)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            run_id,
            a.route_id.value(),
            a.vehicle_id.value(),
            format_timestamp(a.date),
            a.assignment_cost,
            a.requires_relocation as i64,
            a.requires_service as i64,
            from,
            to,
            km,
            minutes,
            a.overage_km,
            a.chain_score
        ],
    )
    .map_err(db)?;
    Ok(())
}

fn insert_state(tx: &Transaction<'_>, run_id: i64, state: &VehicleState) -> FleetResult<()> {
    tx.execute(
        "INSERT INTO vehicle_states
         (algorithm_run_id, vehicle_id, location_id, odometer_km, km_since_service,
          km_this_lease_year, lifetime_km, lease_cycle_number, total_relocations,
          total_relocation_cost, total_overage_cost, services_done,
          service_cost_accrued, routes_assigned)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            run_id,
            state.vehicle_id.value(),
            state.current_location.map(|l| l.value()),
            state.odometer_km,
            state.km_since_service,
            state.km_this_lease_year,
            state.lifetime_km,
            state.lease_cycle_number,
            state.total_relocations,
            state.total_relocation_cost,
            state.total_overage_cost,
            state.services_done,
            state.service_cost_accrued,
            state.routes_assigned
        ],
    )
    .map_err(db)?;
    Ok(())
}

impl DataSource for SqliteStore {
    fn load_locations(&mut self) -> FleetResult<Vec<Location>> {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare("SELECT id, name, lat, long, is_hub FROM locations ORDER BY id")
            .map_err(db)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Location {
                    id: LocationId::new(row.get(0)?),
                    name: row.get(1)?,
                    lat: row.get(2)?,
                    lon: row.get(3)?,
                    is_hub: row.get::<_, i64>(4)? != 0,
                })
            })
            .map_err(db)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db)
    }

    fn load_relations(&mut self) -> FleetResult<Vec<LocationRelation>> {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, from_location_id, to_location_id, distance_km, time_minutes
                 FROM location_relations ORDER BY id",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LocationRelation {
                    id: RelationId::new(row.get(0)?),
                    from: LocationId::new(row.get(1)?),
                    to: LocationId::new(row.get(2)?),
                    distance_km: Kilometers(row.get(3)?),
                    travel: Minutes(row.get(4)?),
                })
            })
            .map_err(db)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db)
    }

    fn load_vehicles(&mut self) -> FleetResult<Vec<Vehicle>> {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, registration_number, brand, service_interval_km, leasing_start_km,
                        leasing_limit_km, leasing_start_date, leasing_end_date,
                        current_odometer_km, current_location_id
                 FROM vehicles ORDER BY id",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, i64>(8)?,
                    row.get::<_, Option<i64>>(9)?,
                ))
            })
            .map_err(db)?;
        let mut vehicles = Vec::new();
        for row in rows {
            let (id, registration, brand, interval, start_km, limit, start, end, odometer, loc) =
                row.map_err(db)?;
            vehicles.push(Vehicle {
                id: VehicleId::new(id),
                registration,
                brand,
                service_interval_km: interval,
                leasing_start_km: start_km,
                leasing_limit_km: limit,
                lease_start: parse_timestamp(&start)?,
                lease_end: parse_timestamp(&end)?,
                current_odometer_km: odometer,
                current_location: loc.map(LocationId::new),
            });
        }
        Ok(vehicles)
    }

    fn load_routes(&mut self, status: &str) -> FleetResult<Vec<Route>> {
        let conn = self.pool.get()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, start_datetime, end_datetime, distance_km
                 FROM routes WHERE status = ?1 ORDER BY start_datetime, id",
            )
            .map_err(db)?;
        let rows = stmt
            .query_map([status], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                ))
            })
            .map_err(db)?;

        let mut routes = Vec::new();
        for row in rows {
            let (id, start, end, distance) = row.map_err(db)?;
            routes.push(Route {
                id: RouteId::new(id),
                start_time: parse_timestamp(&start)?,
                end_time: parse_timestamp(&end)?,
                distance_km: distance,
                segments: Vec::new(),
            });
        }

        let mut seg_stmt = conn
            .prepare(
                "SELECT id, route_id, seq, start_location_id, end_location_id,
                        start_datetime, end_datetime, relation_id
                 FROM segments ORDER BY route_id, seq",
            )
            .map_err(db)?;
        let seg_rows = seg_stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<i64>>(7)?,
                ))
            })
            .map_err(db)?;

        let mut by_route: BTreeMap<RouteId, Vec<Segment>> = BTreeMap::new();
        for row in seg_rows {
            let (id, route_id, seq, start_loc, end_loc, start, end, relation) = row.map_err(db)?;
            by_route.entry(RouteId::new(route_id)).or_default().push(Segment {
                id: SegmentId::new(id),
                route_id: RouteId::new(route_id),
                seq,
                start_location: LocationId::new(start_loc),
                end_location: LocationId::new(end_loc),
                start_time: parse_timestamp(&start)?,
                end_time: parse_timestamp(&end)?,
                relation_id: RelationId::new(relation.unwrap_or(0)),
            });
        }
        for route in &mut routes {
            if let Some(segments) = by_route.remove(&route.id) {
                route.segments = segments;
            }
        }
        sort_routes(&mut routes);
        Ok(routes)
    }

    fn start_run(&mut self, config_json: &serde_json::Value) -> FleetResult<i64> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO algorithm_runs (config, status) VALUES (?1, 'running')",
            params![config_json.to_string()],
        )
        .map_err(db)?;
        Ok(conn.last_insert_rowid())
    }

    fn complete_run(
        &mut self,
        run_id: i64,
        stats: &RunStats,
        error: Option<&str>,
    ) -> FleetResult<()> {
        let conn = self.pool.get()?;
        let status = if error.is_some() { "failed" } else { "completed" };
        let changed = conn
            .execute(
                "UPDATE algorithm_runs
                 SET completed_at = datetime('now'), status = ?1, routes_processed = ?2,
                     assignments_created = ?3, total_cost = ?4, error_message = ?5
                 WHERE id = ?6",
                params![
                    status,
                    stats.routes_processed as i64,
                    stats.routes_assigned as i64,
                    stats.total_cost,
                    error,
                    run_id
                ],
            )
            .map_err(db)?;
        if changed == 0 {
            return Err(FleetError::Validation(format!("unknown run id {run_id}")));
        }
        Ok(())
    }

    fn save_assignments(
        &mut self,
        run_id: i64,
        assignments: &[Assignment],
        states: &BTreeMap<VehicleId, VehicleState>,
    ) -> FleetResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction().map_err(db)?;
        for assignment in assignments {
            insert_assignment(&tx, run_id, assignment)?;
        }
        for state in states.values() {
            insert_state(&tx, run_id, state)?;
        }
        // Dropping the transaction without this rolls everything back
        tx.commit().map_err(db)?;
        Ok(())
    }

    fn update_vehicle_locations(
        &mut self,
        mapping: &BTreeMap<VehicleId, LocationId>,
    ) -> FleetResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction().map_err(db)?;
        for (vehicle_id, location_id) in mapping {
            tx.execute(
                "UPDATE vehicles SET current_location_id = ?1 WHERE id = ?2",
                params![location_id.value(), vehicle_id.value()],
            )
            .map_err(db)?;
        }
        tx.commit().map_err(db)?;
        Ok(())
    }
}
