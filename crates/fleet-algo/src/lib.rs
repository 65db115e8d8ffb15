//! # fleet-algo: Fleet Optimization Algorithms
//!
//! The two coupled optimizers for a trucking fleet, plus everything they
//! share:
//!
//! | Module | Role |
//! |--------|------|
//! | [`oracle`] | Direct + multi-hop distance lookups, per-run cache |
//! | [`costs`] | Monetary model: relocation, overage, service |
//! | [`feasibility`] | Hard-constraint gate on (vehicle, route) pairs |
//! | [`simulate`] | Atomic post-assignment state mutation |
//! | [`chain`] | Look-ahead scoring of future opportunities |
//! | [`driver`] | The deterministic timeline walk |
//! | [`placement`] | Initial vehicle placement strategies |
//! | [`events`] | Structured progress events and sinks |
//! | [`validate`] | Pre-run input validation |
//!
//! ## Determinism
//!
//! A run is a pure function of its inputs: routes are processed in
//! `(start_time, start_location)` order, candidates are examined in
//! ascending vehicle id, and equal costs resolve to the smaller id.
//! Running the driver twice on the same data produces identical output.
//!
//! ## One run, one state
//!
//! Nothing here is shared between runs. The caller builds a
//! [`oracle::DistanceOracle`] (with its private cache) per run and hands it
//! to the driver; vehicle states live inside the driver call. Concurrent
//! runs, e.g. behind the HTTP surface, therefore never contend.
//!
//! ## Example
//!
//! ```ignore
//! use fleet_algo::{oracle::DistanceOracle, placement, driver, events::LogSink};
//!
//! let oracle = DistanceOracle::new(&relations, true, true);
//! let placed = placement::compute_placement(&vehicles, &routes, &oracle, &config);
//! placement::apply_placement(&mut vehicles, &placed);
//!
//! let mut sink = LogSink;
//! let outcome = driver::run_assignment(&vehicles, &routes, &oracle, &config, &mut sink, None)?;
//! println!("{} routes assigned", outcome.stats.routes_assigned);
//! ```

pub mod chain;
pub mod costs;
pub mod driver;
pub mod events;
pub mod feasibility;
pub mod oracle;
pub mod placement;
pub mod simulate;
pub mod validate;

pub use costs::{CostBreakdown, CostModel};
pub use driver::{run_assignment, AssignmentDriver, AssignmentOutcome};
pub use events::{EventSink, LogSink, NullSink, RunEvent, VecSink};
pub use feasibility::{Feasible, Reason};
pub use oracle::{Connection, DistanceOracle};
pub use placement::{analyze_flow, apply_placement, compute_placement, FlowStats};
pub use validate::validate_inputs;
