//! Run configuration: cost constants, policies, and strategy switches.
//!
//! The configuration object is plain JSON with the sections below; every
//! field has a default so partial files (and empty HTTP bodies) work.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub costs: CostsConfig,
    #[serde(default)]
    pub service_policy: ServicePolicy,
    #[serde(default)]
    pub swap_policy: SwapPolicy,
    #[serde(default)]
    pub assignment: AssignmentOptions,
    #[serde(default)]
    pub placement: PlacementOptions,
    #[serde(default)]
    pub performance: PerformanceOptions,
}

impl OptimizerConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config '{}'", path.display()))?;
        serde_json::from_str(&data).context("parsing config json")
    }
}

/// Monetary constants, in one currency unit (the domain uses PLN but the
/// code is currency-agnostic).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostsConfig {
    #[serde(default = "default_relocation_base")]
    pub relocation_base: f64,
    #[serde(default = "default_relocation_per_km")]
    pub relocation_per_km: f64,
    #[serde(default = "default_relocation_per_hour")]
    pub relocation_per_hour: f64,
    #[serde(default = "default_overage_per_km")]
    pub overage_per_km: f64,
}

fn default_relocation_base() -> f64 {
    1000.0
}
fn default_relocation_per_km() -> f64 {
    1.0
}
fn default_relocation_per_hour() -> f64 {
    150.0
}
fn default_overage_per_km() -> f64 {
    0.92
}

impl Default for CostsConfig {
    fn default() -> Self {
        Self {
            relocation_base: default_relocation_base(),
            relocation_per_km: default_relocation_per_km(),
            relocation_per_hour: default_relocation_per_hour(),
            overage_per_km: default_overage_per_km(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicePolicy {
    #[serde(default = "default_service_tolerance_km")]
    pub service_tolerance_km: i64,
    #[serde(default = "default_service_duration_hours")]
    pub service_duration_hours: i64,
    /// Flat amount accrued when a service is actually scheduled.
    #[serde(default = "default_service_cost")]
    pub service_cost: f64,
    /// Soft-constraint penalty priced into candidates approaching service.
    #[serde(default = "default_service_penalty")]
    pub service_penalty: f64,
}

fn default_service_tolerance_km() -> i64 {
    1000
}
fn default_service_duration_hours() -> i64 {
    48
}
fn default_service_cost() -> f64 {
    2000.0
}
fn default_service_penalty() -> f64 {
    500.0
}

impl Default for ServicePolicy {
    fn default() -> Self {
        Self {
            service_tolerance_km: default_service_tolerance_km(),
            service_duration_hours: default_service_duration_hours(),
            service_cost: default_service_cost(),
            service_penalty: default_service_penalty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapPolicy {
    #[serde(default = "default_max_swaps_per_period")]
    pub max_swaps_per_period: usize,
    #[serde(default = "default_swap_period_days")]
    pub swap_period_days: i64,
}

fn default_max_swaps_per_period() -> usize {
    1
}
fn default_swap_period_days() -> i64 {
    90
}

impl Default for SwapPolicy {
    fn default() -> Self {
        Self {
            max_swaps_per_period: default_max_swaps_per_period(),
            swap_period_days: default_swap_period_days(),
        }
    }
}

impl SwapPolicy {
    pub fn period(&self) -> chrono::Duration {
        chrono::Duration::days(self.swap_period_days)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    #[default]
    Greedy,
    GreedyWithLookahead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentOptions {
    #[serde(default)]
    pub strategy: AssignmentStrategy,
    /// Restrict the routes actually assigned to this many days from the
    /// first route; 0 assigns everything. Later routes stay visible to the
    /// chain scorer.
    #[serde(default)]
    pub assignment_lookahead_days: i64,
    /// Forward horizon of the chain scorer, in days past a route's end.
    #[serde(default = "default_look_ahead_days")]
    pub look_ahead_days: i64,
    #[serde(default = "default_chain_depth")]
    pub chain_depth: usize,
    #[serde(default = "default_chain_weight")]
    pub chain_weight: f64,
    #[serde(default = "default_max_lookahead_routes")]
    pub max_lookahead_routes: usize,
    #[serde(default)]
    pub use_chain_optimization: bool,
}

fn default_look_ahead_days() -> i64 {
    7
}
fn default_chain_depth() -> usize {
    3
}
fn default_chain_weight() -> f64 {
    10.0
}
fn default_max_lookahead_routes() -> usize {
    50
}

impl Default for AssignmentOptions {
    fn default() -> Self {
        Self {
            strategy: AssignmentStrategy::default(),
            assignment_lookahead_days: 0,
            look_ahead_days: default_look_ahead_days(),
            chain_depth: default_chain_depth(),
            chain_weight: default_chain_weight(),
            max_lookahead_routes: default_max_lookahead_routes(),
            use_chain_optimization: false,
        }
    }
}

impl AssignmentOptions {
    /// Chain scoring runs only under the look-ahead strategy with the
    /// switch on and non-degenerate parameters.
    pub fn chain_enabled(&self) -> bool {
        self.strategy == AssignmentStrategy::GreedyWithLookahead
            && self.use_chain_optimization
            && self.chain_depth > 0
            && self.look_ahead_days > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategy {
    #[default]
    CostMatrix,
    Proportional,
    CoverageFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlacementOptions {
    #[serde(default)]
    pub strategy: PlacementStrategy,
    #[serde(default = "default_placement_lookahead_days")]
    pub lookahead_days: i64,
    /// Maximum fraction of the fleet at a single location.
    #[serde(default = "default_max_concentration")]
    pub max_concentration: f64,
    /// Absolute cap per location; derived from fleet size when absent.
    #[serde(default)]
    pub max_vehicles_per_location: Option<usize>,
}

fn default_placement_lookahead_days() -> i64 {
    14
}
fn default_max_concentration() -> f64 {
    0.30
}

impl Default for PlacementOptions {
    fn default() -> Self {
        Self {
            strategy: PlacementStrategy::default(),
            lookahead_days: default_placement_lookahead_days(),
            max_concentration: default_max_concentration(),
            max_vehicles_per_location: None,
        }
    }
}

impl PlacementOptions {
    /// Per-location cap: the explicit value, else `max(5, ceil(0.30 × fleet))`
    /// scaled by `max_concentration`.
    pub fn cap_for_fleet(&self, fleet_size: usize) -> usize {
        match self.max_vehicles_per_location {
            Some(cap) => cap.max(1),
            None => ((fleet_size as f64 * self.max_concentration).ceil() as usize).max(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceOptions {
    #[serde(default = "default_progress_report_interval")]
    pub progress_report_interval: u64,
    /// Enable multi-hop Dijkstra fallback in the distance oracle.
    #[serde(default)]
    pub use_pathfinding: bool,
    #[serde(default = "default_use_relation_cache")]
    pub use_relation_cache: bool,
}

fn default_progress_report_interval() -> u64 {
    1000
}
fn default_use_relation_cache() -> bool {
    true
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        Self {
            progress_report_interval: default_progress_report_interval(),
            use_pathfinding: false,
            use_relation_cache: default_use_relation_cache(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_yields_defaults() {
        let cfg: OptimizerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.costs.relocation_base, 1000.0);
        assert_eq!(cfg.service_policy.service_duration_hours, 48);
        assert_eq!(cfg.swap_policy.max_swaps_per_period, 1);
        assert_eq!(cfg.assignment.strategy, AssignmentStrategy::Greedy);
        assert_eq!(cfg.placement.strategy, PlacementStrategy::CostMatrix);
        assert!(!cfg.performance.use_pathfinding);
        assert!(cfg.performance.use_relation_cache);
    }

    #[test]
    fn strategies_parse_snake_case() {
        let cfg: OptimizerConfig = serde_json::from_str(
            r#"{
                "assignment": {"strategy": "greedy_with_lookahead", "use_chain_optimization": true},
                "placement": {"strategy": "coverage_first", "max_concentration": 0.5}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.assignment.strategy, AssignmentStrategy::GreedyWithLookahead);
        assert!(cfg.assignment.chain_enabled());
        assert_eq!(cfg.placement.strategy, PlacementStrategy::CoverageFirst);
        assert_eq!(cfg.placement.max_concentration, 0.5);
    }

    #[test]
    fn chain_disabled_without_switch() {
        let cfg: OptimizerConfig = serde_json::from_str(
            r#"{"assignment": {"strategy": "greedy_with_lookahead"}}"#,
        )
        .unwrap();
        assert!(!cfg.assignment.chain_enabled());
    }

    #[test]
    fn placement_cap_falls_back_to_fleet_fraction() {
        let opts = PlacementOptions::default();
        assert_eq!(opts.cap_for_fleet(100), 30);
        // small fleets keep the floor of 5
        assert_eq!(opts.cap_for_fleet(4), 5);
        let fixed = PlacementOptions {
            max_vehicles_per_location: Some(12),
            ..Default::default()
        };
        assert_eq!(fixed.cap_for_fleet(100), 12);
    }
}
