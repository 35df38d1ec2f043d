use super::DistanceTable;
use crate::common::{Configuration, LowLevelNode, Position};
use crate::map::Map;
use crate::solver::Budget;

use std::sync::Arc;
use tracing::trace;

/// Agents walked between two budget checks.
const BUDGET_CHECK_INTERVAL: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ResolveError {
    /// The low-level constraint itself is not realisable.
    ConstraintViolation { agent: usize },
    /// A top-level agent could neither move nor stay.
    Deadlock { agent: usize },
    Cancelled,
}

struct Frame {
    agent: usize,
    candidates: Vec<Position>,
    next: usize,
}

/// One-step joint move construction with priority inheritance.
///
/// The resolver only owns scratch occupancy buffers; configurations, the
/// priority order and the distance tables are passed in read-only.
pub(crate) struct Resolver<'a> {
    map: &'a Map,
    dists: &'a [Arc<DistanceTable>],
    max_push_depth: usize,
    occupied_now: Vec<Option<usize>>,
    occupied_next: Vec<Option<usize>>,
    touched: Vec<usize>,
    pushed: Vec<bool>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        map: &'a Map,
        dists: &'a [Arc<DistanceTable>],
        max_push_depth: Option<usize>,
    ) -> Self {
        let num_agents = dists.len();
        Resolver {
            map,
            dists,
            max_push_depth: max_push_depth.unwrap_or(num_agents).max(1),
            occupied_now: vec![None; map.num_cells()],
            occupied_next: vec![None; map.num_cells()],
            touched: Vec::new(),
            pushed: vec![false; num_agents],
        }
    }

    /// Next configuration reachable from `from` under `constraint`, agents
    /// planned in `order`.
    pub(crate) fn step(
        &mut self,
        from: &Configuration,
        order: &[usize],
        constraint: &LowLevelNode,
        budget: &Budget,
    ) -> Result<Configuration, ResolveError> {
        for (agent, &position) in from.iter().enumerate() {
            let cell = self.map.index(position);
            self.occupied_now[cell] = Some(agent);
        }

        let mut to = vec![None; from.len()];
        let result = self.plan(from, order, constraint, &mut to, budget);

        for &position in from.iter() {
            let cell = self.map.index(position);
            self.occupied_now[cell] = None;
        }
        for cell in self.touched.drain(..) {
            self.occupied_next[cell] = None;
        }
        result?;

        match to.iter().position(Option::is_none) {
            Some(agent) => Err(ResolveError::Deadlock { agent }),
            None => Ok(to.into_iter().flatten().collect()),
        }
    }

    fn plan(
        &mut self,
        from: &Configuration,
        order: &[usize],
        constraint: &LowLevelNode,
        to: &mut [Option<Position>],
        budget: &Budget,
    ) -> Result<(), ResolveError> {
        for (agent, cell) in constraint.iter() {
            let cell_index = self.map.index(cell);
            if to[agent].is_some() || self.occupied_next[cell_index].is_some() {
                return Err(ResolveError::ConstraintViolation { agent });
            }
            if let Some(other) = self.occupied_now[cell_index] {
                if other != agent && to[other] == Some(from[agent]) {
                    return Err(ResolveError::ConstraintViolation { agent });
                }
            }
            self.reserve(agent, cell, to);
        }

        for (count, &agent) in order.iter().enumerate() {
            if count % BUDGET_CHECK_INTERVAL == 0 && budget.timed_out() {
                return Err(ResolveError::Cancelled);
            }
            if to[agent].is_none() && !self.pibt(agent, from, to, budget)? {
                trace!("agent {agent} has no legal move from {:?}", from[agent]);
                return Err(ResolveError::Deadlock { agent });
            }
        }

        Ok(())
    }

    fn reserve(&mut self, agent: usize, cell: Position, to: &mut [Option<Position>]) {
        let cell_index = self.map.index(cell);
        self.occupied_next[cell_index] = Some(agent);
        self.touched.push(cell_index);
        to[agent] = Some(cell);
    }

    fn release(&mut self, agent: usize, cell: Position, to: &mut [Option<Position>]) {
        let cell_index = self.map.index(cell);
        self.occupied_next[cell_index] = None;
        to[agent] = None;
    }

    /// Neighbors plus staying, closest to the target first; on ties free
    /// cells before occupied ones, then by coordinates.
    fn candidates(&self, agent: usize, here: Position) -> Vec<Position> {
        let table = &self.dists[agent];
        let mut cells = self.map.neighbors(here).to_vec();
        cells.push(here);
        cells.sort_by_key(|&cell| {
            let occupied = matches!(
                self.occupied_now[self.map.index(cell)],
                Some(other) if other != agent
            );
            (table.get(cell), occupied, cell)
        });
        cells
    }

    /// Priority inheritance as an explicit stack walk. An agent that wants a
    /// cell held by an unplanned agent pushes that agent onto the stack; the
    /// pushed agent must move first, otherwise it stays and the pusher tries
    /// its next candidate.
    fn pibt(
        &mut self,
        root: usize,
        from: &Configuration,
        to: &mut [Option<Position>],
        budget: &Budget,
    ) -> Result<bool, ResolveError> {
        let mut stack = vec![Frame {
            agent: root,
            candidates: self.candidates(root, from[root]),
            next: 0,
        }];
        self.pushed[root] = true;

        // Result of the frame popped last, consumed by the frame below it.
        let mut outcome: Option<bool> = None;
        let mut walked = 0;

        loop {
            if walked % BUDGET_CHECK_INTERVAL == 0 && budget.timed_out() {
                for frame in stack.drain(..) {
                    self.pushed[frame.agent] = false;
                }
                return Err(ResolveError::Cancelled);
            }
            walked += 1;

            let depth = stack.len();
            let Some(frame) = stack.last_mut() else {
                break;
            };
            let agent = frame.agent;

            if outcome.take() == Some(true) {
                // The pushed agent cleared the cell, our reservation holds.
                stack.pop();
                self.pushed[agent] = false;
                outcome = Some(true);
                continue;
            }

            let here = from[agent];
            let mut push = None;
            let mut settled = false;

            while frame.next < frame.candidates.len() {
                let cell = frame.candidates[frame.next];
                frame.next += 1;

                let cell_index = self.map.index(cell);
                if self.occupied_next[cell_index].is_some() {
                    continue;
                }
                let occupant = self.occupied_now[cell_index];
                // Swap with the occupant.
                if let Some(other) = occupant {
                    if other != agent && to[other] == Some(here) {
                        continue;
                    }
                }

                self.reserve(agent, cell, to);
                match occupant {
                    Some(other) if other != agent && to[other].is_none() => {
                        if depth >= self.max_push_depth || self.pushed[other] {
                            self.release(agent, cell, to);
                            continue;
                        }
                        push = Some(other);
                        break;
                    }
                    _ => {
                        settled = true;
                        break;
                    }
                }
            }

            if let Some(other) = push {
                self.pushed[other] = true;
                let candidates = self.candidates(other, from[other]);
                stack.push(Frame {
                    agent: other,
                    candidates,
                    next: 0,
                });
            } else {
                if !settled {
                    // Nothing left: stay, possibly overriding the pusher's
                    // reservation, which then moves on to its next cell.
                    self.reserve(agent, here, to);
                }
                stack.pop();
                self.pushed[agent] = false;
                outcome = Some(settled);
            }
        }

        Ok(outcome == Some(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::DistanceOracle;

    fn setup(grid: &str, goals: &[Position]) -> (Map, Vec<Arc<DistanceTable>>) {
        let map: Map = grid.parse().unwrap();
        let mut oracle = DistanceOracle::new();
        let dists = oracle.tables_for(&map, goals);
        (map, dists)
    }

    fn config(cells: &[Position]) -> Configuration {
        Configuration(cells.to_vec())
    }

    #[test]
    fn test_greedy_step() {
        let (map, dists) = setup("...", &[(0, 2), (0, 0)]);
        let mut resolver = Resolver::new(&map, &dists, None);
        let next = resolver
            .step(
                &config(&[(0, 0), (0, 2)]),
                &[0, 1],
                &LowLevelNode::root(),
                &Budget::unlimited(),
            )
            .unwrap();
        // Agent 0 takes the middle cell, agent 1 has to wait.
        assert_eq!(next, config(&[(0, 1), (0, 2)]));
    }

    #[test]
    fn test_priority_inheritance() {
        let (map, dists) = setup("...", &[(0, 2), (0, 1)]);
        let mut resolver = Resolver::new(&map, &dists, None);
        let next = resolver
            .step(
                &config(&[(0, 0), (0, 1)]),
                &[0, 1],
                &LowLevelNode::root(),
                &Budget::unlimited(),
            )
            .unwrap();
        // Agent 1 sits on its goal but is pushed forward.
        assert_eq!(next, config(&[(0, 1), (0, 2)]));
    }

    #[test]
    fn test_push_depth_bound() {
        let (map, dists) = setup("...", &[(0, 2), (0, 1)]);
        let mut resolver = Resolver::new(&map, &dists, Some(1));
        let next = resolver
            .step(
                &config(&[(0, 0), (0, 1)]),
                &[0, 1],
                &LowLevelNode::root(),
                &Budget::unlimited(),
            )
            .unwrap();
        assert_eq!(next, config(&[(0, 0), (0, 1)]));
    }

    #[test]
    fn test_no_swap() {
        let (map, dists) = setup("..", &[(0, 1), (0, 0)]);
        let mut resolver = Resolver::new(&map, &dists, None);
        let next = resolver
            .step(
                &config(&[(0, 0), (0, 1)]),
                &[0, 1],
                &LowLevelNode::root(),
                &Budget::unlimited(),
            )
            .unwrap();
        assert_eq!(next, config(&[(0, 0), (0, 1)]));
    }

    #[test]
    fn test_constraint_deadlock() {
        let (map, dists) = setup("..", &[(0, 1), (0, 0)]);
        let mut resolver = Resolver::new(&map, &dists, None);
        let constraint = LowLevelNode::root().child(0, (0, 1));
        let result = resolver.step(
            &config(&[(0, 0), (0, 1)]),
            &[0, 1],
            &constraint,
            &Budget::unlimited(),
        );
        assert_eq!(result, Err(ResolveError::Deadlock { agent: 1 }));

        // Scratch buffers are clean afterwards.
        let next = resolver
            .step(
                &config(&[(0, 0), (0, 1)]),
                &[0, 1],
                &LowLevelNode::root(),
                &Budget::unlimited(),
            )
            .unwrap();
        assert_eq!(next, config(&[(0, 0), (0, 1)]));
    }

    #[test]
    fn test_constraint_violation() {
        let (map, dists) = setup("...", &[(0, 2), (0, 0)]);
        let mut resolver = Resolver::new(&map, &dists, None);
        let constraint = LowLevelNode::root().child(0, (0, 1)).child(1, (0, 1));
        let result = resolver.step(
            &config(&[(0, 0), (0, 2)]),
            &[0, 1],
            &constraint,
            &Budget::unlimited(),
        );
        assert_eq!(result, Err(ResolveError::ConstraintViolation { agent: 1 }));
    }

    #[test]
    fn test_cancelled() {
        let (map, dists) = setup("...", &[(0, 2), (0, 0)]);
        let mut resolver = Resolver::new(&map, &dists, None);
        let budget = Budget::new(Some(std::time::Duration::ZERO), None);
        let result = resolver.step(
            &config(&[(0, 0), (0, 2)]),
            &[0, 1],
            &LowLevelNode::root(),
            &budget,
        );
        assert_eq!(result, Err(ResolveError::Cancelled));
    }

    #[test]
    fn test_cancelled_inside_push_chain() {
        let (map, dists) = setup("....", &[(0, 3), (0, 2), (0, 1)]);
        let mut resolver = Resolver::new(&map, &dists, None);
        let from = config(&[(0, 0), (0, 1), (0, 2)]);
        let mut to = vec![None; 3];
        let expired = Budget::new(Some(std::time::Duration::ZERO), None);
        assert_eq!(
            resolver.pibt(0, &from, &mut to, &expired),
            Err(ResolveError::Cancelled)
        );
        assert!(resolver.pushed.iter().all(|&pushed| !pushed));
        assert!(to.iter().all(Option::is_none));

        // The same chain walks through with time left: everyone shifts right.
        let next = resolver
            .step(&from, &[0, 1, 2], &LowLevelNode::root(), &Budget::unlimited())
            .unwrap();
        assert_eq!(next, config(&[(0, 1), (0, 2), (0, 3)]));
    }
}
