use super::{Configuration, LowLevelNode};
use crate::algorithm::DistanceTable;
use crate::map::Map;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::VecDeque;
use std::sync::Arc;

/// Search node of the segment solver. Nodes live on the DFS stack only and
/// are dropped as soon as their branch is exhausted.
#[derive(Debug, Clone)]
pub(crate) struct HighLevelNode {
    pub(crate) config: Configuration,
    pub(crate) depth: usize,
    pub(crate) g_cost: usize,
    pub(crate) h_cost: usize,
    pub(crate) priorities: Vec<f64>,
    pub(crate) order: Vec<usize>,
    pub(crate) search_tree: VecDeque<LowLevelNode>,
}

impl HighLevelNode {
    pub(crate) fn root(config: Configuration, dists: &[Arc<DistanceTable>]) -> Self {
        let num_agents = config.len();
        let priorities: Vec<f64> = config
            .iter()
            .zip(dists)
            .map(|(&position, table)| table.get(position) as f64 / num_agents as f64)
            .collect();

        HighLevelNode {
            order: order_by_priority(&priorities),
            h_cost: heuristic(&config, dists),
            config,
            depth: 0,
            g_cost: 0,
            priorities,
            search_tree: VecDeque::from([LowLevelNode::root()]),
        }
    }

    pub(crate) fn child(
        &self,
        config: Configuration,
        g_cost: usize,
        goals: &Configuration,
        dists: &[Arc<DistanceTable>],
    ) -> Self {
        // Agents away from their target keep gaining priority, agents that
        // arrived fall back to their fractional base priority.
        let priorities: Vec<f64> = self
            .priorities
            .iter()
            .zip(config.iter().zip(goals.iter()))
            .map(|(&priority, (position, goal))| {
                if position != goal {
                    priority + 1.0
                } else {
                    priority - priority.floor()
                }
            })
            .collect();

        HighLevelNode {
            order: order_by_priority(&priorities),
            h_cost: heuristic(&config, dists),
            config,
            depth: self.depth + 1,
            g_cost,
            priorities,
            search_tree: VecDeque::from([LowLevelNode::root()]),
        }
    }

    pub(crate) fn f_cost(&self) -> usize {
        self.g_cost.saturating_add(self.h_cost)
    }

    /// Lazily produces the next successor constraint. Each popped node
    /// enqueues one child per move option of the next agent in priority
    /// order, so the constraint tree is only ever built as far as consumed.
    pub(crate) fn next_constraint(&mut self, map: &Map, rng: &mut StdRng) -> Option<LowLevelNode> {
        let node = self.search_tree.pop_front()?;

        if node.depth < self.config.len() {
            let agent = self.order[node.depth];
            let here = self.config[agent];
            let mut cells = map.neighbors(here).to_vec();
            cells.push(here);
            cells.shuffle(rng);
            for cell in cells {
                self.search_tree.push_back(node.child(agent, cell));
            }
        }

        Some(node)
    }
}

/// Agents sorted by descending priority, ties broken by agent id.
pub(crate) fn order_by_priority(priorities: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..priorities.len()).collect();
    order.sort_by(|&a, &b| priorities[b].total_cmp(&priorities[a]).then(a.cmp(&b)));
    order
}

/// Sum of remaining distances, a lower bound on the remaining cost.
pub(crate) fn heuristic(config: &Configuration, dists: &[Arc<DistanceTable>]) -> usize {
    config
        .iter()
        .zip(dists)
        .fold(0usize, |acc, (&position, table)| acc.saturating_add(table.get(position)))
}

/// Number of agents that are not resting on their target across the step.
pub(crate) fn edge_cost(from: &Configuration, to: &Configuration, goals: &Configuration) -> usize {
    from.iter()
        .zip(to.iter())
        .zip(goals.iter())
        .filter(|((a, b), goal)| !(a == goal && b == goal))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::DistanceOracle;
    use rand::SeedableRng;

    fn setup() -> (Map, Vec<Arc<DistanceTable>>, Configuration) {
        let map = Map::from_file("map_file/test/empty-5-5.map").unwrap();
        let mut oracle = DistanceOracle::new();
        let goals = Configuration(vec![(4, 4), (0, 0), (2, 2)]);
        let dists = oracle.tables_for(&map, &goals);
        (map, dists, goals)
    }

    #[test]
    fn test_root_order() {
        let (_, dists, _) = setup();
        // Distances 8, 8, 0: the two far agents first, ties by id.
        let root = HighLevelNode::root(Configuration(vec![(0, 0), (4, 4), (2, 2)]), &dists);
        assert_eq!(root.order, vec![0, 1, 2]);
        assert_eq!(root.h_cost, 16);
        assert_eq!(root.f_cost(), 16);
    }

    #[test]
    fn test_child_priorities() {
        let (_, dists, goals) = setup();
        let root = HighLevelNode::root(Configuration(vec![(0, 0), (4, 4), (2, 2)]), &dists);
        let next = Configuration(vec![(0, 1), (4, 3), (2, 2)]);
        let g = edge_cost(&root.config, &next, &goals);
        assert_eq!(g, 2);

        let child = root.child(next, g, &goals, &dists);
        assert_eq!(child.depth, 1);
        assert_eq!(child.g_cost, 2);
        assert!(child.priorities[0] > 1.0);
        assert_eq!(child.priorities[2], 0.0);
        assert_eq!(child.order[2], 2);
    }

    #[test]
    fn test_lazy_constraints() {
        let (map, dists, _) = setup();
        let mut rng = StdRng::seed_from_u64(0);
        let mut root = HighLevelNode::root(Configuration(vec![(0, 0), (4, 4), (2, 2)]), &dists);

        let first = root.next_constraint(&map, &mut rng).unwrap();
        assert_eq!(first.depth, 0);
        // Corner agent 0 has two neighbors plus staying.
        assert_eq!(root.search_tree.len(), 3);

        let second = root.next_constraint(&map, &mut rng).unwrap();
        assert_eq!(second.who, vec![0]);
        assert!(map.is_adjacent_or_same((0, 0), second.cells[0]));
        // Agent 1 in the opposite corner adds three more.
        assert_eq!(root.search_tree.len(), 5);
    }
}
