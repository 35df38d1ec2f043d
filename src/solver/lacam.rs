use super::{Budget, Segment, SegmentPlan, Solver};
use crate::algorithm::{DistanceTable, ResolveError, Resolver};
use crate::common::{edge_cost, Configuration, HighLevelNode, Path};
use crate::config::Config;
use crate::error::MapfError;
use crate::map::Map;
use crate::stat::Stats;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

/// Depth-first search over joint configurations. Successors are generated
/// one at a time from each node's constraint tree and resolved into full
/// configurations by priority inheritance.
pub struct LaCAM<'a> {
    map: &'a Map,
    config: &'a Config,
    stats: Stats,
}

impl<'a> LaCAM<'a> {
    pub fn new(map: &'a Map, config: &'a Config) -> Self {
        LaCAM {
            map,
            config,
            stats: Stats::default(),
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn check_endpoints(
        &self,
        segment: &Segment,
        dists: &[Arc<DistanceTable>],
    ) -> Result<(), MapfError> {
        if let Some((agent_1, agent_2)) = segment.goals.first_collision() {
            return Err(MapfError::SegmentInfeasible {
                segment: segment.index,
                reason: format!(
                    "agents {agent_1} and {agent_2} both have to end on {:?}",
                    segment.goals[agent_1]
                ),
            });
        }

        for (agent, (&start, table)) in segment.starts.iter().zip(dists).enumerate() {
            if !table.is_reachable(start) {
                return Err(MapfError::UnreachableWaypoint {
                    segment: segment.index,
                    agent,
                    from: start,
                    to: table.target(),
                });
            }
        }
        Ok(())
    }
}

/// Per-agent paths of a configuration sequence, each cut after the agent's
/// final arrival.
fn agent_paths(configs: &[&Configuration]) -> Vec<Path> {
    let num_agents = configs.first().map_or(0, |config| config.len());
    (0..num_agents)
        .map(|agent| {
            let mut path: Path = configs.iter().map(|config| config[agent]).collect();
            while path.len() > 1 && path[path.len() - 2] == path[path.len() - 1] {
                path.pop();
            }
            path
        })
        .collect()
}

fn sum_of_costs(paths: &[Path]) -> usize {
    paths.iter().map(|path| path.len() - 1).sum()
}

impl Solver for LaCAM<'_> {
    #[instrument(skip_all, name = "lacam", fields(segment = segment.index, agents = segment.starts.len()), level = "debug")]
    fn solve(
        &mut self,
        segment: &Segment,
        dists: &[Arc<DistanceTable>],
        budget: &Budget,
    ) -> Result<SegmentPlan, MapfError> {
        self.stats = Stats::default();
        self.check_endpoints(segment, dists)?;

        let goals = &segment.goals;
        let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(segment.index as u64));
        let mut resolver = Resolver::new(self.map, dists, self.config.max_push_depth);
        let horizon = self.config.max_horizon.unwrap_or(usize::MAX);

        let root = HighLevelNode::root(segment.starts.clone(), dists);
        let lower_bound = root.h_cost;
        debug!("start search, lower bound {lower_bound}");

        let mut incumbent: Option<(Vec<Path>, usize)> = None;
        if segment.starts == *goals {
            incumbent = Some((agent_paths(&[&segment.starts]), 0));
        }

        let mut on_branch: HashSet<Configuration> = HashSet::from([segment.starts.clone()]);
        let mut explored: HashMap<Configuration, usize> =
            HashMap::from([(segment.starts.clone(), 0)]);
        let mut stack = vec![root];
        let mut complete = false;
        // Set once a node is cut by the horizon, which leaves feasibility
        // undecided.
        let mut truncated = false;

        loop {
            if budget.exhausted(self.stats.high_level_expand_nodes) {
                debug!("budget exhausted");
                break;
            }
            let Some(top) = stack.last_mut() else {
                complete = true;
                break;
            };

            let bounded = incumbent
                .as_ref()
                .is_some_and(|(_, best)| top.f_cost() >= *best);
            let constraint = if bounded {
                None
            } else if top.depth >= horizon {
                truncated = true;
                None
            } else {
                top.next_constraint(self.map, &mut rng)
            };
            let Some(constraint) = constraint else {
                // Dead node: every candidate was tried or none can beat
                // the incumbent.
                if let Some(node) = stack.pop() {
                    on_branch.remove(&node.config);
                }
                continue;
            };
            self.stats.low_level_expand_nodes += 1;

            let next = match resolver.step(&top.config, &top.order, &constraint, budget) {
                Ok(next) => next,
                Err(ResolveError::Cancelled) => {
                    debug!("cancelled while resolving");
                    break;
                }
                Err(err) => {
                    trace!("resolver failed: {err:?}");
                    self.stats.resolver_failures += 1;
                    continue;
                }
            };

            if on_branch.contains(&next) {
                self.stats.revisits += 1;
                continue;
            }
            let g_cost = top.g_cost + edge_cost(&top.config, &next, goals);
            if explored.get(&next).is_some_and(|&seen| seen <= g_cost) {
                self.stats.revisits += 1;
                continue;
            }
            explored.insert(next.clone(), g_cost);
            self.stats.high_level_expand_nodes += 1;

            if next == *goals {
                let configs: Vec<&Configuration> = stack
                    .iter()
                    .map(|node| &node.config)
                    .chain(std::iter::once(&next))
                    .collect();
                let paths = agent_paths(&configs);
                let cost = sum_of_costs(&paths);
                if incumbent.as_ref().map_or(true, |(_, best)| cost < *best) {
                    debug!(
                        "new solution: cost {cost}, depth {}, expanded {}",
                        configs.len() - 1,
                        self.stats.high_level_expand_nodes
                    );
                    self.stats.improvements += 1;
                    incumbent = Some((paths, cost));
                }
                if !self.config.anytime {
                    break;
                }
                continue;
            }

            let child = stack[stack.len() - 1].child(next.clone(), g_cost, goals, dists);
            on_branch.insert(next);
            stack.push(child);
        }

        self.stats.time_us = budget.elapsed().as_micros() as usize;
        if truncated {
            debug!("search cut by horizon {horizon}");
            complete = false;
        }

        match incumbent {
            Some((paths, cost)) => {
                self.stats.costs = cost;
                self.stats.makespan = paths.iter().map(|path| path.len() - 1).max().unwrap_or(0);
                self.stats.print(segment.index);
                Ok(SegmentPlan {
                    paths,
                    cost,
                    complete,
                    stats: self.stats.clone(),
                })
            }
            None if complete && self.stats.high_level_expand_nodes == 0 => {
                let agent = HighLevelNode::root(segment.starts.clone(), dists).order[0];
                Err(MapfError::ResolverDeadlock {
                    segment: segment.index,
                    agent,
                })
            }
            None if complete => {
                info!("segment {} exhausted without a solution", segment.index);
                Err(MapfError::SegmentInfeasible {
                    segment: segment.index,
                    reason: format!(
                        "search space exhausted after {} expansions",
                        self.stats.high_level_expand_nodes
                    ),
                })
            }
            None => Err(MapfError::BudgetExceeded {
                segment: segment.index,
                expanded: self.stats.high_level_expand_nodes,
                elapsed_ms: budget.elapsed().as_millis(),
                lower_bound,
            }),
        }
    }
}
