use crate::common::Position;
use crate::map::Map;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Distance assigned to cells that cannot reach the target.
pub const UNREACHABLE: usize = usize::MAX;

/// Step count from every cell to one target, ignoring other agents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistanceTable {
    target: Position,
    width: usize,
    dist: Vec<usize>,
}

impl DistanceTable {
    #[instrument(skip_all, name = "bfs", fields(target = format!("{target:?}")), level = "trace")]
    pub fn new(map: &Map, target: Position) -> Self {
        let mut dist = vec![UNREACHABLE; map.num_cells()];
        let mut queue = VecDeque::new();

        if map.is_passable(target.0, target.1) {
            dist[map.index(target)] = 0;
            queue.push_back(target);
        }

        while let Some(current) = queue.pop_front() {
            let next_dist = dist[map.index(current)] + 1;
            for &neighbor in map.neighbors(current) {
                let slot = &mut dist[map.index(neighbor)];
                if *slot == UNREACHABLE {
                    *slot = next_dist;
                    queue.push_back(neighbor);
                }
            }
        }

        DistanceTable {
            target,
            width: map.width,
            dist,
        }
    }

    pub fn target(&self) -> Position {
        self.target
    }

    pub fn get(&self, position: Position) -> usize {
        self.dist[position.0 * self.width + position.1]
    }

    pub fn is_reachable(&self, position: Position) -> bool {
        self.get(position) != UNREACHABLE
    }
}

/// Cache of distance tables keyed by target cell. Agents sharing a target
/// share the same table.
#[derive(Debug, Default)]
pub struct DistanceOracle {
    tables: HashMap<Position, Arc<DistanceTable>>,
}

impl DistanceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn contains(&self, target: Position) -> bool {
        self.tables.contains_key(&target)
    }

    pub fn table(&mut self, map: &Map, target: Position) -> Arc<DistanceTable> {
        Arc::clone(
            self.tables
                .entry(target)
                .or_insert_with(|| Arc::new(DistanceTable::new(map, target))),
        )
    }

    /// One table per entry of `targets`, in the same order.
    pub fn tables_for(&mut self, map: &Map, targets: &[Position]) -> Vec<Arc<DistanceTable>> {
        targets.iter().map(|&target| self.table(map, target)).collect()
    }

    /// Distinct targets that are not cached yet.
    pub fn missing(&self, targets: &[Position]) -> Vec<Position> {
        let mut seen = HashSet::new();
        targets
            .iter()
            .copied()
            .filter(|target| !self.tables.contains_key(target) && seen.insert(*target))
            .collect()
    }

    /// Builds tables without touching any cache, so it can run on a worker
    /// thread while the oracle itself is borrowed elsewhere.
    pub fn compute(map: &Map, targets: &[Position]) -> Vec<DistanceTable> {
        debug!("precompute {} distance tables", targets.len());
        targets
            .iter()
            .map(|&target| DistanceTable::new(map, target))
            .collect()
    }

    pub fn insert_all(&mut self, tables: impl IntoIterator<Item = DistanceTable>) {
        for table in tables {
            self.tables
                .entry(table.target())
                .or_insert_with(|| Arc::new(table));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_open_grid() {
        let map = Map::from_file("map_file/test/empty-5-5.map").unwrap();
        let table = DistanceTable::new(&map, (2, 2));
        assert_eq!(table.get((2, 2)), 0);
        assert_eq!(table.get((0, 0)), 4);
        assert_eq!(table.get((4, 3)), 3);
        assert_eq!(table.target(), (2, 2));
    }

    #[test]
    fn test_distance_around_obstacle() {
        let map = Map::from_file("map_file/test/test.map").unwrap();
        let table = DistanceTable::new(&map, (0, 0));
        // (2, 2) must walk around the blocked center.
        assert_eq!(table.get((2, 2)), 4);
        assert_eq!(table.get((1, 1)), UNREACHABLE);
    }

    #[test]
    fn test_distance_disconnected_region() {
        let map = Map::from_file("map_file/test/split-3-5.map").unwrap();
        let table = DistanceTable::new(&map, (0, 0));
        assert!(table.is_reachable((2, 1)));
        assert!(!table.is_reachable((0, 3)));
        assert!(!table.is_reachable((2, 4)));
    }

    #[test]
    fn test_oracle_shares_tables() {
        let map = Map::from_file("map_file/test/empty-5-5.map").unwrap();
        let mut oracle = DistanceOracle::new();
        let tables = oracle.tables_for(&map, &[(0, 0), (4, 4), (0, 0)]);
        assert_eq!(oracle.len(), 2);
        assert!(Arc::ptr_eq(&tables[0], &tables[2]));

        assert_eq!(oracle.missing(&[(0, 0), (1, 1), (1, 1)]), vec![(1, 1)]);
        oracle.insert_all(DistanceOracle::compute(&map, &[(1, 1)]));
        assert!(oracle.contains((1, 1)));
        assert!(oracle.missing(&[(1, 1)]).is_empty());
    }
}
