use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::Write;
use std::time::Instant;
use tabwriter::TabWriter;
use tracing_subscriber::FmtSubscriber;

mod cli;

use cli::{Cli, Commands};
use fleet_algo::events::LogSink;
use fleet_algo::{
    apply_placement, compute_placement, validate_inputs, AssignmentDriver, AssignmentOutcome,
    DistanceOracle,
};
use fleet_core::{OptimizerConfig, PlacementResult};
use fleet_io::{CsvStore, DataSet, DataSource, SqliteStore};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default tracing subscriber")?;

    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Run {} => {
            let mut source = open_backend(&cli)?;
            cmd_run(source.as_mut(), &config, true, true)
        }
        Commands::Placement {} => {
            let mut source = open_backend(&cli)?;
            cmd_run(source.as_mut(), &config, true, false)
        }
        Commands::Assignment {} => {
            let mut source = open_backend(&cli)?;
            cmd_run(source.as_mut(), &config, false, true)
        }
        Commands::Validate {} => {
            let mut source = open_backend(&cli)?;
            cmd_validate(source.as_mut())
        }
        Commands::Import {} => cmd_import(&cli),
        Commands::DbInfo {} => cmd_db_info(&cli),
    }
}

fn load_config(cli: &Cli) -> Result<OptimizerConfig> {
    match &cli.config {
        Some(path) => OptimizerConfig::from_path(path),
        None => Ok(OptimizerConfig::default()),
    }
}

fn open_backend(cli: &Cli) -> Result<Box<dyn DataSource>> {
    match &cli.db {
        Some(path) => {
            let store = SqliteStore::open(path, 2, 10)
                .with_context(|| format!("opening database '{}'", path.display()))?;
            Ok(Box::new(store))
        }
        None => Ok(Box::new(CsvStore::new(&cli.data_dir, &cli.output_dir))),
    }
}

fn load_and_validate(source: &mut dyn DataSource) -> Result<DataSet> {
    let started = Instant::now();
    let data = source.load_all()?;
    validate_inputs(&data.vehicles, &data.locations, &data.relations, &data.routes)?;
    tracing::info!(
        "loaded {} vehicles, {} locations, {} relations, {} routes in {:.2}s",
        data.vehicles.len(),
        data.locations.len(),
        data.relations.len(),
        data.routes.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(data)
}

fn cmd_run(
    source: &mut dyn DataSource,
    config: &OptimizerConfig,
    placement: bool,
    assignment: bool,
) -> Result<()> {
    let mut data = load_and_validate(source)?;
    let run_id = source.start_run(&serde_json::to_value(config)?)?;
    let started = Instant::now();

    let oracle = DistanceOracle::new(
        &data.relations,
        config.performance.use_pathfinding,
        config.performance.use_relation_cache,
    );

    let outcome = (|| -> Result<Option<AssignmentOutcome>> {
        if placement {
            let result = compute_placement(&data.vehicles, &data.routes, &oracle, config);
            source.update_vehicle_locations(&result.placements)?;
            apply_placement(&mut data.vehicles, &result);
            print_placement_summary(&result)?;
        }

        if assignment {
            let mut sink = LogSink;
            let driver = AssignmentDriver::new(config, &data.routes, &oracle);
            let outcome = driver.run(&data.vehicles, &mut sink)?;
            source.save_assignments(run_id, &outcome.assignments, &outcome.states)?;
            print_assignment_summary(&outcome)?;
            return Ok(Some(outcome));
        }
        Ok(None)
    })();

    match outcome {
        Ok(outcome) => {
            let stats = outcome.map(|o| o.stats).unwrap_or(fleet_core::RunStats {
                complete: true,
                ..Default::default()
            });
            source.complete_run(run_id, &stats, None)?;
            println!(
                "Run {} finished in {:.2}s",
                run_id,
                started.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(err) => {
            let _ = source.complete_run(run_id, &Default::default(), Some(&err.to_string()));
            Err(err)
        }
    }
}

fn print_placement_summary(result: &PlacementResult) -> Result<()> {
    let mut tw = TabWriter::new(std::io::stdout());
    writeln!(tw, "Placement")?;
    writeln!(tw, "  vehicles placed\t{}", result.placements.len())?;
    writeln!(tw, "  locations used\t{}", result.quality.locations_used)?;
    writeln!(
        tw,
        "  max concentration\t{:.1}%",
        result.quality.max_concentration * 100.0
    )?;
    writeln!(
        tw,
        "  demand coverage\t{:.1}%",
        result.quality.demand_coverage * 100.0
    )?;
    writeln!(
        tw,
        "  est. relocation cost\t{:.0}",
        result.quality.estimated_relocation_cost
    )?;
    tw.flush()?;
    Ok(())
}

fn print_assignment_summary(outcome: &AssignmentOutcome) -> Result<()> {
    let stats = &outcome.stats;
    let mut tw = TabWriter::new(std::io::stdout());
    writeln!(tw, "Assignment")?;
    writeln!(tw, "  routes processed\t{}", stats.routes_processed)?;
    writeln!(tw, "  routes assigned\t{}", stats.routes_assigned)?;
    writeln!(tw, "  routes unassigned\t{}", stats.routes_unassigned)?;
    writeln!(tw, "  relocations\t{}", stats.total_relocations)?;
    writeln!(tw, "  relocation cost\t{:.2}", stats.total_relocation_cost)?;
    writeln!(tw, "  overage cost\t{:.2}", stats.total_overage_cost)?;
    writeln!(tw, "  service cost\t{:.2}", stats.total_service_cost)?;
    writeln!(tw, "  total cost\t{:.2}", stats.total_cost)?;
    writeln!(tw, "  avg cost per route\t{:.2}", stats.avg_cost_per_route)?;
    if !stats.complete {
        writeln!(tw, "  (partial result: run was cancelled)")?;
    }
    tw.flush()?;

    let over_limit = outcome
        .states
        .values()
        .filter(|s| s.km_this_lease_year > s.annual_limit_km)
        .count();
    if over_limit > 0 {
        println!("{over_limit} vehicles over their annual limit");
    }
    Ok(())
}

fn cmd_validate(source: &mut dyn DataSource) -> Result<()> {
    match load_and_validate(source) {
        Ok(_) => {
            println!("Data set is valid");
            Ok(())
        }
        Err(err) => {
            eprintln!("Validation failed: {err}");
            Err(err)
        }
    }
}

fn cmd_import(cli: &Cli) -> Result<()> {
    let db_path = cli
        .db
        .as_ref()
        .ok_or_else(|| anyhow!("import requires --db <path>"))?;
    let mut store =
        SqliteStore::open(db_path, 1, 4).with_context(|| "opening target database")?;
    let counts = store.import_csv(&cli.data_dir)?;
    let mut tw = TabWriter::new(std::io::stdout());
    writeln!(tw, "Imported into {}", db_path.display())?;
    writeln!(tw, "  locations\t{}", counts.locations)?;
    writeln!(tw, "  relations\t{}", counts.relations)?;
    writeln!(tw, "  vehicles\t{}", counts.vehicles)?;
    writeln!(tw, "  routes\t{}", counts.routes)?;
    writeln!(tw, "  segments\t{}", counts.segments)?;
    tw.flush()?;
    Ok(())
}

fn cmd_db_info(cli: &Cli) -> Result<()> {
    match &cli.db {
        Some(path) => {
            let store = SqliteStore::open(path, 1, 2)?;
            let info = store.info()?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        None => {
            let mut store = CsvStore::new(&cli.data_dir, &cli.output_dir);
            let data = store.load_all()?;
            println!(
                "csv backend at {}: {} locations, {} relations, {} vehicles, {} routes",
                cli.data_dir.display(),
                data.locations.len(),
                data.relations.len(),
                data.vehicles.len(),
                data.routes.len()
            );
        }
    }
    Ok(())
}
