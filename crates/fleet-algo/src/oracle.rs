//! Distance oracle: direct and multi-hop travel lookups between locations.
//!
//! Resolution order for `lookup(from, to)`:
//! 1. `from == to` returns the zero-weight sentinel (no physical move).
//! 2. A direct relation `(from, to)` or `(to, from)` — the reverse
//!    direction reuses the forward weights.
//! 3. With pathfinding enabled, Dijkstra over the undirected relation graph
//!    minimising total travel minutes, capped at three hops; the result is a
//!    synthetic connection with summed weights.
//! 4. Otherwise `None`.
//!
//! Results (including misses) are memoised in an oracle-owned cache. The
//! cache is per run: each run constructs its own oracle, so nothing leaks
//! across runs. Travel times stay in minutes end to end.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use fleet_core::units::{Kilometers, Minutes};
use fleet_core::{LocationId, LocationRelation};

/// A resolved travel leg between two locations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Connection {
    pub distance_km: Kilometers,
    pub travel: Minutes,
    /// Relation edges traversed; 0 for the same-location sentinel.
    pub hops: u32,
}

impl Connection {
    /// Sentinel for `from == to`: a zero-weight identity, not a relocation.
    pub fn zero() -> Self {
        Connection {
            distance_km: Kilometers::ZERO,
            travel: Minutes::ZERO,
            hops: 0,
        }
    }

    /// Whether this leg involves any physical movement. A relation carrying
    /// zero weights behaves like the same-location sentinel.
    pub fn is_move(&self) -> bool {
        self.hops > 0 && (self.distance_km.0 > 0.0 || self.travel.0 > 0.0)
    }
}

const MAX_HOPS: u32 = 3;

struct HeapEntry {
    travel_min: f64,
    distance_km: f64,
    node: LocationId,
    hops: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.travel_min == other.travel_min && self.node == other.node
    }
}
impl Eq for HeapEntry {}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on travel minutes; ties broken on node id for determinism.
        other
            .travel_min
            .total_cmp(&self.travel_min)
            .then_with(|| other.node.value().cmp(&self.node.value()))
    }
}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Per-run distance lookup over the location relation network.
pub struct DistanceOracle {
    direct: HashMap<(LocationId, LocationId), Connection>,
    adjacency: HashMap<LocationId, Vec<(LocationId, f64, f64)>>,
    use_pathfinding: bool,
    use_cache: bool,
    cache: RefCell<HashMap<(LocationId, LocationId), Option<Connection>>>,
}

impl DistanceOracle {
    pub fn new(relations: &[LocationRelation], use_pathfinding: bool, use_cache: bool) -> Self {
        let mut direct = HashMap::new();
        let mut adjacency: HashMap<LocationId, Vec<(LocationId, f64, f64)>> = HashMap::new();

        for rel in relations {
            direct.insert(
                (rel.from, rel.to),
                Connection {
                    distance_km: rel.distance_km,
                    travel: rel.travel,
                    hops: 1,
                },
            );
            // Undirected adjacency for multi-hop search
            adjacency
                .entry(rel.from)
                .or_default()
                .push((rel.to, rel.distance_km.0, rel.travel.0));
            adjacency
                .entry(rel.to)
                .or_default()
                .push((rel.from, rel.distance_km.0, rel.travel.0));
        }

        // Deterministic expansion order
        for neighbours in adjacency.values_mut() {
            neighbours.sort_by_key(|(id, _, _)| id.value());
        }

        DistanceOracle {
            direct,
            adjacency,
            use_pathfinding,
            use_cache,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Resolve a travel leg; `None` means the destination is unreachable
    /// under the current pathfinding setting.
    pub fn lookup(&self, from: LocationId, to: LocationId) -> Option<Connection> {
        if from == to {
            return Some(Connection::zero());
        }

        if self.use_cache {
            if let Some(cached) = self.cache.borrow().get(&(from, to)) {
                return *cached;
            }
        }

        let result = self.resolve(from, to);

        if self.use_cache {
            self.cache.borrow_mut().insert((from, to), result);
        }
        result
    }

    fn resolve(&self, from: LocationId, to: LocationId) -> Option<Connection> {
        if let Some(conn) = self.direct.get(&(from, to)) {
            return Some(*conn);
        }
        // Reverse direction reuses the forward weights
        if let Some(conn) = self.direct.get(&(to, from)) {
            return Some(*conn);
        }
        if self.use_pathfinding {
            return self.shortest_path(from, to);
        }
        None
    }

    /// Dijkstra over the undirected relation graph, minimising travel
    /// minutes, at most [`MAX_HOPS`] edges.
    fn shortest_path(&self, from: LocationId, to: LocationId) -> Option<Connection> {
        let mut heap = BinaryHeap::new();
        let mut settled: HashMap<LocationId, f64> = HashMap::new();

        heap.push(HeapEntry {
            travel_min: 0.0,
            distance_km: 0.0,
            node: from,
            hops: 0,
        });

        while let Some(entry) = heap.pop() {
            if entry.node == to {
                return Some(Connection {
                    distance_km: Kilometers(entry.distance_km),
                    travel: Minutes(entry.travel_min),
                    hops: entry.hops,
                });
            }
            match settled.get(&entry.node) {
                Some(best) if *best <= entry.travel_min => continue,
                _ => {
                    settled.insert(entry.node, entry.travel_min);
                }
            }
            if entry.hops >= MAX_HOPS {
                continue;
            }
            if let Some(neighbours) = self.adjacency.get(&entry.node) {
                for (next, km, min) in neighbours {
                    if !settled.contains_key(next) {
                        heap.push(HeapEntry {
                            travel_min: entry.travel_min + min,
                            distance_km: entry.distance_km + km,
                            node: *next,
                            hops: entry.hops + 1,
                        });
                    }
                }
            }
        }
        None
    }

    /// Drop all memoised results. Fresh oracles start empty; this exists for
    /// callers that reuse one oracle across configuration changes.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Whether a direct (single-edge) relation exists in either direction.
    pub fn has_direct(&self, a: LocationId, b: LocationId) -> bool {
        self.direct.contains_key(&(a, b)) || self.direct.contains_key(&(b, a))
    }

    /// All locations that appear as a relation endpoint, ascending.
    pub fn known_locations(&self) -> Vec<LocationId> {
        let mut ids: Vec<LocationId> = self.adjacency.keys().copied().collect();
        ids.sort_by_key(|id| id.value());
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::RelationId;

    fn rel(id: i64, from: i64, to: i64, km: f64, min: f64) -> LocationRelation {
        LocationRelation {
            id: RelationId::new(id),
            from: LocationId::new(from),
            to: LocationId::new(to),
            distance_km: Kilometers(km),
            travel: Minutes(min),
        }
    }

    #[test]
    fn same_location_is_zero_sentinel() {
        let oracle = DistanceOracle::new(&[], false, true);
        let conn = oracle.lookup(LocationId::new(1), LocationId::new(1)).unwrap();
        assert!(!conn.is_move());
        assert_eq!(conn.distance_km, Kilometers::ZERO);
    }

    #[test]
    fn reverse_direction_reuses_weights() {
        let oracle = DistanceOracle::new(&[rel(1, 1, 2, 50.0, 60.0)], false, true);
        let fwd = oracle.lookup(LocationId::new(1), LocationId::new(2)).unwrap();
        let rev = oracle.lookup(LocationId::new(2), LocationId::new(1)).unwrap();
        assert_eq!(fwd.distance_km, rev.distance_km);
        assert_eq!(fwd.travel, rev.travel);
        assert_eq!(rev.hops, 1);
    }

    #[test]
    fn no_path_without_pathfinding() {
        let relations = vec![rel(1, 1, 2, 50.0, 60.0), rel(2, 2, 3, 40.0, 45.0)];
        let oracle = DistanceOracle::new(&relations, false, true);
        assert!(oracle.lookup(LocationId::new(1), LocationId::new(3)).is_none());
    }

    #[test]
    fn multi_hop_sums_weights() {
        let relations = vec![rel(1, 1, 2, 50.0, 60.0), rel(2, 2, 3, 40.0, 45.0)];
        let oracle = DistanceOracle::new(&relations, true, true);
        let conn = oracle.lookup(LocationId::new(1), LocationId::new(3)).unwrap();
        assert_eq!(conn.distance_km, Kilometers(90.0));
        assert_eq!(conn.travel, Minutes(105.0));
        assert_eq!(conn.hops, 2);
    }

    #[test]
    fn dijkstra_prefers_fewer_minutes_not_fewer_hops() {
        // 1-4 direct takes 300 min; 1-2-3-4 takes 150 min
        let relations = vec![
            rel(1, 1, 4, 100.0, 300.0),
            rel(2, 1, 2, 40.0, 50.0),
            rel(3, 2, 3, 40.0, 50.0),
            rel(4, 3, 4, 40.0, 50.0),
        ];
        let oracle = DistanceOracle::new(&relations, true, true);
        let conn = oracle.lookup(LocationId::new(1), LocationId::new(4)).unwrap();
        assert_eq!(conn.travel, Minutes(150.0));
        assert_eq!(conn.hops, 3);
    }

    #[test]
    fn hop_cap_excludes_long_chains() {
        let relations = vec![
            rel(1, 1, 2, 10.0, 10.0),
            rel(2, 2, 3, 10.0, 10.0),
            rel(3, 3, 4, 10.0, 10.0),
            rel(4, 4, 5, 10.0, 10.0),
        ];
        let oracle = DistanceOracle::new(&relations, true, true);
        // 4 hops needed: out of reach
        assert!(oracle.lookup(LocationId::new(1), LocationId::new(5)).is_none());
        // 3 hops: fine
        assert!(oracle.lookup(LocationId::new(1), LocationId::new(4)).is_some());
    }

    #[test]
    fn zero_weight_relation_is_identity() {
        let oracle = DistanceOracle::new(&[rel(1, 1, 2, 0.0, 0.0)], false, true);
        let conn = oracle.lookup(LocationId::new(1), LocationId::new(2)).unwrap();
        assert!(!conn.is_move());
    }

    #[test]
    fn cache_returns_identical_results() {
        let relations = vec![rel(1, 1, 2, 50.0, 60.0)];
        let oracle = DistanceOracle::new(&relations, false, true);
        let first = oracle.lookup(LocationId::new(1), LocationId::new(2));
        let second = oracle.lookup(LocationId::new(1), LocationId::new(2));
        assert_eq!(first, second);
        oracle.clear_cache();
        assert_eq!(oracle.lookup(LocationId::new(1), LocationId::new(2)), first);
    }
}
