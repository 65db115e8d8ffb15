//! Hard-constraint gate on (vehicle, route) pairs.
//!
//! Soft preferences (service imminence, annual overage) never appear here —
//! they are priced by the cost model. A rejection is domain data, not an
//! error: the driver records it and moves on.

use chrono::NaiveDateTime;
use std::fmt;

use fleet_core::{OptimizerConfig, Route, VehicleState};

use crate::oracle::{Connection, DistanceOracle};

/// Why a vehicle cannot take a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Missing endpoints, non-positive distance, or inverted time window.
    InvalidRoute,
    /// The vehicle (after any pending service) is free too late.
    NotAvailable,
    /// No relation chain connects the vehicle to the route start.
    NoPath,
    /// A path exists but arrival would be after the route start.
    CannotReach,
    /// The relocation cadence cap is exhausted.
    SwapExceeded,
    /// The lifetime contract cap would be breached.
    WouldExceedContract,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Reason::InvalidRoute => "invalid route",
            Reason::NotAvailable => "not available in time",
            Reason::NoPath => "no path to route start",
            Reason::CannotReach => "cannot reach route start in time",
            Reason::SwapExceeded => "swap limit exceeded",
            Reason::WouldExceedContract => "would exceed contract limit",
        };
        f.write_str(text)
    }
}

/// Everything downstream steps need from a passed gate, so the cost model
/// and state mutator never repeat oracle work.
#[derive(Debug, Clone, Copy)]
pub struct Feasible {
    /// A service stop must be scheduled before this route.
    pub needs_service: bool,
    /// Availability after any pending service.
    pub effective_available: NaiveDateTime,
    /// Relocation leg to the route start; `None` when already there.
    pub relocation: Option<Connection>,
}

/// Evaluate the hard constraints in order. `enforce_swap` is dropped by the
/// driver's relaxed fallback pass and by the chain scorer's forward scan.
pub fn check(
    state: &VehicleState,
    route: &Route,
    oracle: &DistanceOracle,
    config: &OptimizerConfig,
    enforce_swap: bool,
) -> Result<Feasible, Reason> {
    // 1. Route sanity
    let start_location = route.start_location().ok_or(Reason::InvalidRoute)?;
    route.end_location().ok_or(Reason::InvalidRoute)?;
    if route.distance_km <= 0.0 || route.end_time <= route.start_time {
        return Err(Reason::InvalidRoute);
    }

    // 2. Pending service extends the effective availability
    let needs_service = state.needs_service(config.service_policy.service_tolerance_km);
    let effective_available = if needs_service {
        state.available_from + chrono::Duration::hours(config.service_policy.service_duration_hours)
    } else {
        state.available_from
    };

    // 3. Free in time at the current position
    if effective_available > route.start_time {
        return Err(Reason::NotAvailable);
    }

    // 4. Reachability; arrival exactly at start_time is feasible
    let current = state.current_location.ok_or(Reason::NoPath)?;
    let relocation = if current != start_location {
        let conn = oracle.lookup(current, start_location).ok_or(Reason::NoPath)?;
        if effective_available + conn.travel.to_duration() > route.start_time {
            return Err(Reason::CannotReach);
        }
        Some(conn)
    } else {
        None
    };

    // 5. Swap policy applies only when a relocation is actually required
    if enforce_swap {
        if let Some(conn) = &relocation {
            if conn.is_move() {
                let recent =
                    state.recent_relocations(route.start_time, config.swap_policy.period());
                if recent >= config.swap_policy.max_swaps_per_period {
                    return Err(Reason::SwapExceeded);
                }
            }
        }
    }

    // 6. Lifetime cap counts the relocation leg too
    if let Some(cap) = state.lifetime_cap_km {
        let reloc_km = relocation.map(|c| c.distance_km.whole()).unwrap_or(0);
        if state.lifetime_km + route.distance_km as i64 + reloc_km > cap {
            return Err(Reason::WouldExceedContract);
        }
    }

    Ok(Feasible {
        needs_service,
        effective_available,
        relocation,
    })
}
