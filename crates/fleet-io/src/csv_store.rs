//! Tabular file backend.
//!
//! Reads the six-file CSV set with the exact column headers the upstream
//! system exports (note the `Id` / `Leasing_start_km` /
//! `Current_location_id` casing in `vehicles.csv`) and writes results as
//! CSV plus a JSON run manifest. Output files are written to a temp path
//! and renamed into place so a failed write never leaves a half file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use fleet_core::units::{Kilometers, Minutes};
use fleet_core::{
    sort_routes, Assignment, FleetError, FleetResult, Location, LocationId, LocationRelation,
    RelationId, Route, RouteId, RunStats, Segment, SegmentId, Vehicle, VehicleId, VehicleState,
};

use crate::DataSource;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parse a wire timestamp: second precision, optional fraction, bare dates
/// accepted for lease boundaries.
pub fn parse_timestamp(value: &str) -> FleetResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .map(|d| d.and_hms_opt(0, 0, 0).expect("midnight exists"))
        })
        .map_err(|e| FleetError::Parse(format!("bad timestamp '{value}': {e}")))
}

pub fn format_timestamp(value: NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

fn csv_err(context: &str, err: csv::Error) -> FleetError {
    FleetError::Parse(format!("{context}: {err}"))
}

#[derive(Debug, Deserialize)]
struct LocationRow {
    id: i64,
    name: String,
    lat: f64,
    long: f64,
    is_hub: i64,
}

#[derive(Debug, Deserialize)]
struct RelationRow {
    id: i64,
    id_loc_1: i64,
    id_loc_2: i64,
    dist: f64,
    time: f64,
}

#[derive(Debug, Deserialize)]
struct VehicleRow {
    #[serde(rename = "Id")]
    id: i64,
    registration_number: String,
    brand: String,
    service_interval_km: i64,
    #[serde(rename = "Leasing_start_km")]
    leasing_start_km: i64,
    leasing_limit_km: i64,
    leasing_start_date: String,
    leasing_end_date: String,
    current_odometer_km: i64,
    #[serde(rename = "Current_location_id")]
    current_location_id: String,
}

#[derive(Debug, Deserialize)]
struct RouteRow {
    id: i64,
    start_datetime: String,
    end_datetime: String,
    distance_km: f64,
}

#[derive(Debug, Deserialize)]
struct SegmentRow {
    id: i64,
    route_id: i64,
    seq: i64,
    start_loc_id: i64,
    end_loc_id: i64,
    start_datetime: String,
    end_datetime: String,
    relation_id: i64,
}

/// One entry in `runs.json`, the file backend's stand-in for run rows.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: i64,
    pub started_at: String,
    pub status: String,
    pub config: serde_json::Value,
    #[serde(default)]
    pub stats: Option<RunStats>,
    #[serde(default)]
    pub error: Option<String>,
}

/// CSV-backed data source rooted at a data directory, writing results into
/// an output directory.
pub struct CsvStore {
    data_dir: PathBuf,
    output_dir: PathBuf,
}

impl CsvStore {
    pub fn new(data_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        CsvStore {
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    fn runs_path(&self) -> PathBuf {
        self.output_dir.join("runs.json")
    }

    fn read_runs(&self) -> FleetResult<Vec<RunRecord>> {
        let path = self.runs_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&data)?)
    }

    fn write_runs(&self, runs: &[RunRecord]) -> FleetResult<()> {
        fs::create_dir_all(&self.output_dir)?;
        let json = serde_json::to_string_pretty(runs)?;
        write_atomically(&self.runs_path(), json.as_bytes())
    }

    fn load_segments(&self) -> FleetResult<BTreeMap<RouteId, Vec<Segment>>> {
        let path = self.data_file("segments.csv");
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| csv_err(&format!("opening {}", path.display()), e))?;
        let mut by_route: BTreeMap<RouteId, Vec<Segment>> = BTreeMap::new();
        for row in reader.deserialize::<SegmentRow>() {
            let row = row.map_err(|e| csv_err("reading segments.csv", e))?;
            let segment = Segment {
                id: SegmentId::new(row.id),
                route_id: RouteId::new(row.route_id),
                seq: row.seq,
                start_location: LocationId::new(row.start_loc_id),
                end_location: LocationId::new(row.end_loc_id),
                start_time: parse_timestamp(&row.start_datetime)?,
                end_time: parse_timestamp(&row.end_datetime)?,
                relation_id: RelationId::new(row.relation_id),
            };
            by_route.entry(segment.route_id).or_default().push(segment);
        }
        for segments in by_route.values_mut() {
            segments.sort_by_key(|s| s.seq);
        }
        Ok(by_route)
    }

    /// `vehicles.csv` schema, reusable for the placement output file.
    fn write_vehicle_rows(
        &self,
        path: &Path,
        vehicles: &[Vehicle],
        placement: Option<&BTreeMap<VehicleId, LocationId>>,
    ) -> FleetResult<()> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "Id",
                "registration_number",
                "brand",
                "service_interval_km",
                "Leasing_start_km",
                "leasing_limit_km",
                "leasing_start_date",
                "leasing_end_date",
                "current_odometer_km",
                "Current_location_id",
            ])
            .map_err(|e| csv_err("writing vehicle header", e))?;
        for vehicle in vehicles {
            let location = placement
                .and_then(|p| p.get(&vehicle.id).copied())
                .or(vehicle.current_location);
            let location_cell = match location {
                Some(loc) => loc.value().to_string(),
                None => "N/A".to_string(),
            };
            writer
                .write_record([
                    vehicle.id.value().to_string(),
                    vehicle.registration.clone(),
                    vehicle.brand.clone(),
                    vehicle.service_interval_km.to_string(),
                    vehicle.leasing_start_km.to_string(),
                    vehicle.leasing_limit_km.to_string(),
                    format_timestamp(vehicle.lease_start),
                    format_timestamp(vehicle.lease_end),
                    vehicle.current_odometer_km.to_string(),
                    location_cell,
                ])
                .map_err(|e| csv_err("writing vehicle row", e))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| FleetError::Parse(format!("flushing vehicle rows: {e}")))?;
        write_atomically(path, &bytes)
    }
}

impl DataSource for CsvStore {
    fn load_locations(&mut self) -> FleetResult<Vec<Location>> {
        let path = self.data_file("locations.csv");
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| csv_err(&format!("opening {}", path.display()), e))?;
        let mut locations = Vec::new();
        for row in reader.deserialize::<LocationRow>() {
            let row = row.map_err(|e| csv_err("reading locations.csv", e))?;
            locations.push(Location {
                id: LocationId::new(row.id),
                name: row.name,
                lat: row.lat,
                lon: row.long,
                is_hub: row.is_hub != 0,
            });
        }
        Ok(locations)
    }

    fn load_relations(&mut self) -> FleetResult<Vec<LocationRelation>> {
        let path = self.data_file("locations_relations.csv");
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| csv_err(&format!("opening {}", path.display()), e))?;
        let mut relations = Vec::new();
        for row in reader.deserialize::<RelationRow>() {
            let row = row.map_err(|e| csv_err("reading locations_relations.csv", e))?;
            relations.push(LocationRelation {
                id: RelationId::new(row.id),
                from: LocationId::new(row.id_loc_1),
                to: LocationId::new(row.id_loc_2),
                distance_km: Kilometers(row.dist),
                travel: Minutes(row.time),
            });
        }
        Ok(relations)
    }

    fn load_vehicles(&mut self) -> FleetResult<Vec<Vehicle>> {
        let path = self.data_file("vehicles.csv");
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| csv_err(&format!("opening {}", path.display()), e))?;
        let mut vehicles = Vec::new();
        for row in reader.deserialize::<VehicleRow>() {
            let row = row.map_err(|e| csv_err("reading vehicles.csv", e))?;
            let current_location = match row.current_location_id.trim() {
                "" | "N/A" | "None" => None,
                value => Some(LocationId::new(value.parse::<f64>().map_err(|_| {
                    FleetError::Parse(format!("bad Current_location_id '{value}'"))
                })? as i64)),
            };
            vehicles.push(Vehicle {
                id: VehicleId::new(row.id),
                registration: row.registration_number,
                brand: row.brand,
                service_interval_km: row.service_interval_km,
                leasing_start_km: row.leasing_start_km,
                leasing_limit_km: row.leasing_limit_km,
                lease_start: parse_timestamp(&row.leasing_start_date)?,
                lease_end: parse_timestamp(&row.leasing_end_date)?,
                current_odometer_km: row.current_odometer_km,
                current_location,
            });
        }
        Ok(vehicles)
    }

    fn load_routes(&mut self, _status: &str) -> FleetResult<Vec<Route>> {
        let segments = self.load_segments()?;
        let path = self.data_file("routes.csv");
        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| csv_err(&format!("opening {}", path.display()), e))?;
        let mut routes = Vec::new();
        for row in reader.deserialize::<RouteRow>() {
            let row = row.map_err(|e| csv_err("reading routes.csv", e))?;
            let id = RouteId::new(row.id);
            routes.push(Route {
                id,
                start_time: parse_timestamp(&row.start_datetime)?,
                end_time: parse_timestamp(&row.end_datetime)?,
                distance_km: row.distance_km,
                segments: segments.get(&id).cloned().unwrap_or_default(),
            });
        }
        sort_routes(&mut routes);
        Ok(routes)
    }

    fn start_run(&mut self, config_json: &serde_json::Value) -> FleetResult<i64> {
        let mut runs = self.read_runs()?;
        let run_id = runs.last().map(|r| r.run_id + 1).unwrap_or(1);
        runs.push(RunRecord {
            run_id,
            started_at: format_timestamp(chrono::Local::now().naive_local()),
            status: "running".into(),
            config: config_json.clone(),
            stats: None,
            error: None,
        });
        self.write_runs(&runs)?;
        Ok(run_id)
    }

    fn complete_run(
        &mut self,
        run_id: i64,
        stats: &RunStats,
        error: Option<&str>,
    ) -> FleetResult<()> {
        let mut runs = self.read_runs()?;
        let record = runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| FleetError::Validation(format!("unknown run id {run_id}")))?;
        record.status = if error.is_some() { "failed" } else { "completed" }.into();
        record.stats = Some(stats.clone());
        record.error = error.map(String::from);
        self.write_runs(&runs)
    }

    fn save_assignments(
        &mut self,
        run_id: i64,
        assignments: &[Assignment],
        states: &BTreeMap<VehicleId, VehicleState>,
    ) -> FleetResult<()> {
        fs::create_dir_all(&self.output_dir)?;
        let assignments_path = self.output_dir.join(format!("assignments_run{run_id}.csv"));
        let states_path = self.output_dir.join(format!("vehicle_states_run{run_id}.csv"));

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "route_id",
                "vehicle_id",
                "date",
                "route_distance_km",
                "route_start_location",
                "route_end_location",
                "vehicle_km_before",
                "vehicle_km_after",
                "annual_km_before",
                "annual_km_after",
                "requires_relocation",
                "requires_service",
                "assignment_cost",
                "relocation_from",
                "relocation_to",
                "relocation_distance_km",
                "relocation_time_minutes",
                "overage_km",
                "chain_score",
            ])
            .map_err(|e| csv_err("writing assignment header", e))?;
        for a in assignments {
            let (reloc_from, reloc_to, reloc_km, reloc_min) = match &a.relocation {
                Some(leg) => (
                    leg.from.value().to_string(),
                    leg.to.value().to_string(),
                    format!("{:.2}", leg.distance_km.0),
                    format!("{:.1}", leg.travel.0),
                ),
                None => (String::new(), String::new(), "0.00".into(), "0.0".into()),
            };
            writer
                .write_record([
                    a.route_id.value().to_string(),
                    a.vehicle_id.value().to_string(),
                    format_timestamp(a.date),
                    format!("{:.2}", a.route_distance_km),
                    a.route_start_location.value().to_string(),
                    a.route_end_location.value().to_string(),
                    a.vehicle_km_before.to_string(),
                    a.vehicle_km_after.to_string(),
                    a.annual_km_before.to_string(),
                    a.annual_km_after.to_string(),
                    a.requires_relocation.to_string(),
                    a.requires_service.to_string(),
                    format!("{:.2}", a.assignment_cost),
                    reloc_from,
                    reloc_to,
                    reloc_km,
                    reloc_min,
                    a.overage_km.to_string(),
                    format!("{:.4}", a.chain_score),
                ])
                .map_err(|e| csv_err("writing assignment row", e))?;
        }
        let assignment_bytes = writer
            .into_inner()
            .map_err(|e| FleetError::Parse(format!("flushing assignments: {e}")))?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record([
                "vehicle_id",
                "final_location_id",
                "odometer_km",
                "km_this_lease_year",
                "lifetime_km",
                "annual_limit_km",
                "overage_km",
                "overage_ratio",
                "total_relocations",
                "total_relocation_cost",
                "total_overage_cost",
                "services_done",
                "service_cost_accrued",
                "routes_assigned",
                "km_since_service",
                "service_due",
            ])
            .map_err(|e| csv_err("writing state header", e))?;
        for (vehicle_id, state) in states {
            let overage_ratio = if state.annual_limit_km > 0 {
                state.km_this_lease_year as f64 / state.annual_limit_km as f64
            } else {
                0.0
            };
            writer
                .write_record([
                    vehicle_id.value().to_string(),
                    state
                        .current_location
                        .map(|l| l.value().to_string())
                        .unwrap_or_else(|| "N/A".into()),
                    state.odometer_km.to_string(),
                    state.km_this_lease_year.to_string(),
                    state.lifetime_km.to_string(),
                    state.annual_limit_km.to_string(),
                    state.overage_km().to_string(),
                    format!("{overage_ratio:.4}"),
                    state.total_relocations.to_string(),
                    format!("{:.2}", state.total_relocation_cost),
                    format!("{:.2}", state.total_overage_cost),
                    state.services_done.to_string(),
                    format!("{:.2}", state.service_cost_accrued),
                    state.routes_assigned.to_string(),
                    state.km_since_service.to_string(),
                    (state.km_since_service >= state.service_interval_km).to_string(),
                ])
                .map_err(|e| csv_err("writing state row", e))?;
        }
        let state_bytes = writer
            .into_inner()
            .map_err(|e| FleetError::Parse(format!("flushing states: {e}")))?;

        // Both files staged before either lands
        write_atomically(&assignments_path, &assignment_bytes)?;
        write_atomically(&states_path, &state_bytes)?;
        Ok(())
    }

    fn update_vehicle_locations(
        &mut self,
        mapping: &BTreeMap<VehicleId, LocationId>,
    ) -> FleetResult<()> {
        let vehicles = self.load_vehicles()?;
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join("vehicles_with_placement.csv");
        self.write_vehicle_rows(&path, &vehicles, Some(mapping))
    }
}

/// Stage to `<path>.tmp` and rename into place.
fn write_atomically(path: &Path, bytes: &[u8]) -> FleetResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, name: &str, content: &str) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        file.write_all(content.trim_start().as_bytes()).unwrap();
    }

    fn seed_data(dir: &Path) {
        write_file(
            dir,
            "locations.csv",
            r#"
id,name,lat,long,is_hub
1,Warszawa,52.23,21.01,1
2,Krakow,50.06,19.94,0
3,Gdansk,54.35,18.65,0
"#,
        );
        write_file(
            dir,
            "locations_relations.csv",
            r#"
id,id_loc_1,id_loc_2,dist,time
1,1,2,295.0,180.0
2,2,3,580.0,360.0
"#,
        );
        write_file(
            dir,
            "vehicles.csv",
            r#"
Id,registration_number,brand,service_interval_km,Leasing_start_km,leasing_limit_km,leasing_start_date,leasing_end_date,current_odometer_km,Current_location_id
1,WGM 1001,DAF,30000,0,100000,2024-01-01 00:00:00,2025-01-01 00:00:00,20000,1
2,WGM 1002,Scania,40000,0,450000,2024-01-01 00:00:00,2025-01-01 00:00:00,50000,N/A
"#,
        );
        write_file(
            dir,
            "routes.csv",
            r#"
id,start_datetime,end_datetime,distance_km
11,2024-03-06 08:00:00,2024-03-06 16:00:00,420.5
10,2024-03-05 08:00:00,2024-03-05 16:00:00,295.0
"#,
        );
        write_file(
            dir,
            "segments.csv",
            r#"
id,route_id,seq,start_loc_id,end_loc_id,start_datetime,end_datetime,relation_id
100,10,1,1,2,2024-03-05 08:00:00,2024-03-05 16:00:00,1
101,11,2,2,3,2024-03-06 12:00:00,2024-03-06 16:00:00,2
102,11,1,1,2,2024-03-06 08:00:00,2024-03-06 12:00:00,1
"#,
        );
    }

    #[test]
    fn loads_the_six_file_set() {
        let dir = TempDir::new().unwrap();
        seed_data(dir.path());
        let mut store = CsvStore::new(dir.path(), dir.path().join("output"));
        let data = store.load_all().unwrap();

        assert_eq!(data.locations.len(), 3);
        assert!(data.locations[0].is_hub);
        assert_eq!(data.relations.len(), 2);
        assert_eq!(data.relations[0].travel, Minutes(180.0));

        assert_eq!(data.vehicles.len(), 2);
        assert_eq!(data.vehicles[0].current_location, Some(LocationId::new(1)));
        assert_eq!(data.vehicles[1].current_location, None); // N/A
        assert!(data.vehicles[1].has_lifetime_cap());

        // Routes sorted by start time, segments ordered by seq
        assert_eq!(data.routes[0].id, RouteId::new(10));
        let multi = &data.routes[1];
        assert_eq!(multi.segments.len(), 2);
        assert_eq!(multi.start_location(), Some(LocationId::new(1)));
        assert_eq!(multi.end_location(), Some(LocationId::new(3)));
    }

    #[test]
    fn run_lifecycle_round_trips_through_manifest() {
        let dir = TempDir::new().unwrap();
        seed_data(dir.path());
        let out = dir.path().join("output");
        let mut store = CsvStore::new(dir.path(), &out);

        let config = serde_json::json!({"assignment": {"strategy": "greedy"}});
        let first = store.start_run(&config).unwrap();
        let second = store.start_run(&config).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);

        let stats = RunStats {
            routes_processed: 2,
            routes_assigned: 2,
            complete: true,
            ..Default::default()
        };
        store.complete_run(first, &stats, None).unwrap();
        store.complete_run(second, &stats, Some("boom")).unwrap();

        let runs: Vec<RunRecord> =
            serde_json::from_str(&fs::read_to_string(out.join("runs.json")).unwrap()).unwrap();
        assert_eq!(runs[0].status, "completed");
        assert_eq!(runs[1].status, "failed");
        assert_eq!(runs[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn placement_output_keeps_vehicle_schema() {
        let dir = TempDir::new().unwrap();
        seed_data(dir.path());
        let out = dir.path().join("output");
        let mut store = CsvStore::new(dir.path(), &out);

        let mut mapping = BTreeMap::new();
        mapping.insert(VehicleId::new(2), LocationId::new(3));
        store.update_vehicle_locations(&mapping).unwrap();

        let content = fs::read_to_string(out.join("vehicles_with_placement.csv")).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("Id,registration_number"));
        // Vehicle 1 keeps its location; vehicle 2 got placed at 3
        assert!(content.contains("WGM 1001,DAF"));
        assert!(content.lines().any(|l| l.starts_with("2,") && l.ends_with(",3")));
    }

    #[test]
    fn result_files_carry_the_audit_columns() {
        use fleet_core::state::RelocationLeg;
        use fleet_core::units::Kilometers;

        let dir = TempDir::new().unwrap();
        seed_data(dir.path());
        let out = dir.path().join("output");
        let mut store = CsvStore::new(dir.path(), &out);

        let vehicles = store.load_vehicles().unwrap();
        let mut states = BTreeMap::new();
        let mut state = fleet_core::VehicleState::from_vehicle(
            &vehicles[0],
            parse_timestamp("2024-03-04 08:00:00").unwrap(),
        );
        state.km_this_lease_year = 295;
        states.insert(vehicles[0].id, state);

        let assignment = Assignment {
            route_id: RouteId::new(10),
            vehicle_id: VehicleId::new(1),
            date: parse_timestamp("2024-03-05 08:00:00").unwrap(),
            route_distance_km: 295.0,
            route_start_location: LocationId::new(1),
            route_end_location: LocationId::new(2),
            vehicle_km_before: 20_000,
            vehicle_km_after: 20_295,
            annual_km_before: 0,
            annual_km_after: 295,
            requires_relocation: true,
            requires_service: false,
            assignment_cost: 1200.0,
            relocation: Some(RelocationLeg {
                from: LocationId::new(2),
                to: LocationId::new(1),
                distance_km: Kilometers(295.0),
                travel: Minutes(180.0),
            }),
            overage_km: 0,
            chain_score: 0.0,
        };
        store.save_assignments(7, &[assignment], &states).unwrap();

        let assignments = fs::read_to_string(out.join("assignments_run7.csv")).unwrap();
        assert!(assignments.starts_with("route_id,vehicle_id,date"));
        assert!(assignments.contains("2024-03-05 08:00:00"));
        assert!(assignments.contains("1200.00"));

        let states_csv = fs::read_to_string(out.join("vehicle_states_run7.csv")).unwrap();
        assert!(states_csv.starts_with("vehicle_id,final_location_id"));
        assert!(states_csv.lines().nth(1).unwrap().starts_with("1,1,20000,295"));
    }

    #[test]
    fn timestamps_accept_second_precision_and_dates() {
        assert!(parse_timestamp("2024-03-05 08:00:00").is_ok());
        assert!(parse_timestamp("2024-03-05 08:00:00.123").is_ok());
        let midnight = parse_timestamp("2024-03-05").unwrap();
        assert_eq!(format_timestamp(midnight), "2024-03-05 00:00:00");
        assert!(parse_timestamp("not a date").is_err());
    }
}
