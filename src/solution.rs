use crate::common::{Agent, Configuration, Path, Position};
use crate::error::MapfError;
use crate::map::Map;
use crate::solver::SegmentPlan;
use crate::stat::Stats;

use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConflictType {
    Vertex {
        position: Position,
        time_step: usize,
    },
    Edge {
        u: Position,
        v: Position,
        time_step: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Conflict {
    pub agent_1: usize,
    pub agent_2: usize,
    pub conflict_type: ConflictType,
}

/// Timestep of the final arrival: waits before it count, trailing waits do
/// not.
pub fn path_cost(path: &[Position]) -> usize {
    let Some(last) = path.last() else {
        return 0;
    };
    path.iter()
        .rposition(|position| position != last)
        .map_or(0, |time_step| time_step + 1)
}

/// First vertex or swap conflict between any two paths. Agents rest on their
/// last cell once their path ends.
pub fn find_conflict(paths: &[Path]) -> Option<Conflict> {
    let horizon = paths.iter().map(Vec::len).max().unwrap_or(0);
    let at = |path: &Path, time_step: usize| path.get(time_step).or(path.last()).copied();

    for time_step in 0..horizon {
        let mut occupied: HashMap<Position, usize> = HashMap::with_capacity(paths.len());
        for (agent, path) in paths.iter().enumerate() {
            let Some(position) = at(path, time_step) else {
                continue;
            };
            if let Some(&other) = occupied.get(&position) {
                return Some(Conflict {
                    agent_1: other,
                    agent_2: agent,
                    conflict_type: ConflictType::Vertex {
                        position,
                        time_step,
                    },
                });
            }
            occupied.insert(position, agent);
        }

        if time_step == 0 {
            continue;
        }

        // Vertex conflicts at `time_step - 1` were ruled out, so previous
        // cells identify agents uniquely.
        let previous: HashMap<Position, usize> = paths
            .iter()
            .enumerate()
            .filter_map(|(agent, path)| at(path, time_step - 1).map(|position| (position, agent)))
            .collect();
        for (agent, path) in paths.iter().enumerate() {
            let (Some(u), Some(v)) = (at(path, time_step - 1), at(path, time_step)) else {
                continue;
            };
            if u == v {
                continue;
            }
            if let Some(&other) = previous.get(&v) {
                if other != agent && at(&paths[other], time_step) == Some(u) {
                    return Some(Conflict {
                        agent_1: agent,
                        agent_2: other,
                        conflict_type: ConflictType::Edge { u, v, time_step },
                    });
                }
            }
        }
    }

    None
}

/// Solved segment with per-agent paths.
#[derive(Debug, Clone)]
pub struct SegmentSolution {
    pub index: usize,
    pub paths: Vec<Path>,
    pub cost: usize,
    pub makespan: usize,
    pub runtime: Duration,
    pub complete: bool,
    pub stats: Stats,
}

impl SegmentSolution {
    pub fn new(index: usize, plan: SegmentPlan, runtime: Duration) -> Self {
        let cost = plan.paths.iter().map(|path| path_cost(path)).sum();
        let makespan = plan
            .paths
            .iter()
            .map(|path| path.len().saturating_sub(1))
            .max()
            .unwrap_or(0);
        SegmentSolution {
            index,
            paths: plan.paths,
            cost,
            makespan,
            runtime,
            complete: plan.complete,
            stats: plan.stats,
        }
    }

    /// Barrier synchronisation: every agent waits on its target until the
    /// slowest agent of the segment arrives.
    pub fn pad_to_makespan(&mut self) {
        for path in self.paths.iter_mut() {
            if let Some(&last) = path.last() {
                path.resize(self.makespan + 1, last);
            }
        }
    }

    pub fn is_padded(&self) -> bool {
        self.paths.iter().all(|path| path.len() == self.makespan + 1)
    }

    pub fn initial_configuration(&self) -> Configuration {
        self.paths.iter().filter_map(|path| path.first().copied()).collect()
    }

    pub fn final_configuration(&self) -> Configuration {
        self.paths.iter().filter_map(|path| path.last().copied()).collect()
    }

    pub fn path_lengths(&self) -> Vec<usize> {
        self.paths.iter().map(|path| path_cost(path)).collect()
    }
}

/// Stitched multi-segment plan.
#[derive(Debug, Clone)]
pub struct Solution {
    pub segments: Vec<SegmentSolution>,
    pub paths: Vec<Path>,
    pub cost: usize,
    pub runtime: Duration,
}

impl Solution {
    /// Checks that every agent ends each segment where it starts the next.
    pub fn check_barriers(segments: &[SegmentSolution]) -> Result<(), MapfError> {
        for pair in segments.windows(2) {
            let (before, after) = (&pair[0], &pair[1]);
            for (agent, (ended, next)) in before.paths.iter().zip(&after.paths).enumerate() {
                if let (Some(&end), Some(&start)) = (ended.last(), next.first()) {
                    if end != start {
                        return Err(MapfError::BarrierMismatch {
                            segment: before.index,
                            agent,
                            end,
                            start,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn stitch(segments: Vec<SegmentSolution>, runtime: Duration) -> Result<Self, MapfError> {
        Self::check_barriers(&segments)?;
        Ok(Self::join(segments, runtime))
    }

    /// Concatenates segments whose barriers were checked.
    pub(crate) fn join(mut segments: Vec<SegmentSolution>, runtime: Duration) -> Self {
        let num_agents = segments.first().map_or(0, |segment| segment.paths.len());
        let mut paths: Vec<Path> = vec![Vec::new(); num_agents];

        for segment in segments.iter_mut() {
            // No-op for segments already padded by the orchestrator.
            segment.pad_to_makespan();
            for (full, part) in paths.iter_mut().zip(&segment.paths) {
                let skip = usize::from(!full.is_empty());
                full.extend(part.iter().skip(skip));
            }
        }

        let cost = segments.iter().map(|segment| segment.cost).sum();
        debug!("stitched {} segments, total cost {cost}", segments.len());
        Solution {
            segments,
            paths,
            cost,
            runtime,
        }
    }

    /// Per-agent path length: the agent's cost summed over all segments,
    /// barrier waits excluded.
    pub fn path_lengths(&self) -> Vec<usize> {
        let mut lengths = vec![0; self.paths.len()];
        for segment in &self.segments {
            for (total, length) in lengths.iter_mut().zip(segment.path_lengths()) {
                *total += length;
            }
        }
        lengths
    }

    pub fn makespan(&self) -> usize {
        self.segments.iter().map(|segment| segment.makespan).sum()
    }

    /// Timestep at which each segment ends in the stitched paths.
    pub fn segment_boundaries(&self) -> Vec<usize> {
        self.segments
            .iter()
            .scan(0, |time_step, segment| {
                *time_step += segment.makespan;
                Some(*time_step)
            })
            .collect()
    }

    pub fn verify(&self, map: &Map, agents: &[Agent]) -> bool {
        if self.paths.len() != agents.len() {
            error!("{} paths for {} agents", self.paths.len(), agents.len());
            return false;
        }

        let horizon = self.makespan() + 1;
        for (agent, path) in agents.iter().zip(&self.paths) {
            if path.len() != horizon {
                error!("agent {} path has length {}, expected {horizon}", agent.id, path.len());
                return false;
            }
            if path.first() != Some(&agent.start) || path.last() != Some(&agent.goal) {
                error!("agent {} does not go from its start to its goal", agent.id);
                return false;
            }
            if let Some(step) = path
                .windows(2)
                .position(|step| !map.is_passable(step[1].0, step[1].1) || !map.is_adjacent_or_same(step[0], step[1]))
            {
                error!("agent {} makes an illegal move at {}", agent.id, step + 1);
                return false;
            }
        }

        if let Some(conflict) = find_conflict(&self.paths) {
            error!("conflict in solution: {conflict:?}");
            return false;
        }

        for (k, boundary) in self.segment_boundaries().into_iter().enumerate() {
            for (agent, path) in agents.iter().zip(&self.paths) {
                if path[boundary] != agent.segment_target(k) {
                    error!(
                        "agent {} is at {:?} at the end of segment {k}, expected {:?}",
                        agent.id,
                        path[boundary],
                        agent.segment_target(k)
                    );
                    return false;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(index: usize, paths: Vec<Path>) -> SegmentSolution {
        SegmentSolution::new(
            index,
            SegmentPlan {
                paths,
                cost: 0,
                complete: true,
                stats: Stats::default(),
            },
            Duration::ZERO,
        )
    }

    #[test]
    fn test_path_cost() {
        assert_eq!(path_cost(&[]), 0);
        assert_eq!(path_cost(&[(0, 0)]), 0);
        assert_eq!(path_cost(&[(0, 0), (0, 0), (0, 0)]), 0);
        assert_eq!(path_cost(&[(0, 0), (0, 0), (0, 1), (0, 1)]), 2);
        // Leaving the target and returning counts up to the last arrival.
        assert_eq!(path_cost(&[(0, 1), (0, 0), (0, 1), (0, 1)]), 2);
    }

    #[test]
    fn test_find_conflict() {
        let vertex = vec![vec![(0, 0), (0, 1)], vec![(0, 2), (0, 1)]];
        assert_eq!(
            find_conflict(&vertex),
            Some(Conflict {
                agent_1: 0,
                agent_2: 1,
                conflict_type: ConflictType::Vertex {
                    position: (0, 1),
                    time_step: 1
                },
            })
        );

        let edge = vec![vec![(0, 0), (0, 1)], vec![(0, 1), (0, 0)]];
        assert!(matches!(
            find_conflict(&edge),
            Some(Conflict {
                conflict_type: ConflictType::Edge { time_step: 1, .. },
                ..
            })
        ));

        // Agent 0 finished and rests on (0, 1) while agent 1 walks into it.
        let resting = vec![vec![(0, 1)], vec![(0, 3), (0, 2), (0, 1)]];
        assert!(matches!(
            find_conflict(&resting),
            Some(Conflict {
                conflict_type: ConflictType::Vertex { time_step: 2, .. },
                ..
            })
        ));

        let follow = vec![vec![(0, 1), (0, 2)], vec![(0, 0), (0, 1)]];
        assert_eq!(find_conflict(&follow), None);
    }

    #[test]
    fn test_pad_to_makespan() {
        let mut solution = segment(0, vec![vec![(0, 0), (0, 1), (0, 2)], vec![(1, 1)]]);
        assert_eq!(solution.cost, 2);
        assert_eq!(solution.makespan, 2);
        assert!(!solution.is_padded());

        solution.pad_to_makespan();
        assert!(solution.is_padded());
        assert_eq!(solution.paths[1], vec![(1, 1), (1, 1), (1, 1)]);
        // Padding never changes the cost.
        assert_eq!(solution.paths.iter().map(|p| path_cost(p)).sum::<usize>(), 2);
        assert_eq!(solution.path_lengths(), vec![2, 0]);
        assert_eq!(
            solution.final_configuration(),
            Configuration(vec![(0, 2), (1, 1)])
        );
    }

    #[test]
    fn test_stitch() {
        let first = segment(0, vec![vec![(0, 0), (0, 1)], vec![(1, 1)]]);
        let second = segment(1, vec![vec![(0, 1), (0, 2), (1, 2)], vec![(1, 1), (1, 0)]]);
        let solution = Solution::stitch(vec![first, second], Duration::ZERO).unwrap();

        assert_eq!(solution.cost, 1 + 3);
        assert_eq!(solution.makespan(), 3);
        assert_eq!(solution.segment_boundaries(), vec![1, 3]);
        assert_eq!(solution.paths[0], vec![(0, 0), (0, 1), (0, 2), (1, 2)]);
        assert_eq!(solution.paths[1], vec![(1, 1), (1, 1), (1, 0), (1, 0)]);
        // Agent 1 waits one step at the barrier, which is not counted.
        assert_eq!(solution.path_lengths(), vec![3, 1]);
        assert_eq!(solution.path_lengths().iter().sum::<usize>(), solution.cost);
    }

    #[test]
    fn test_stitch_barrier_mismatch() {
        let first = segment(0, vec![vec![(0, 0), (0, 1)]]);
        let second = segment(1, vec![vec![(0, 2), (0, 3)]]);
        let segments = vec![first, second];
        // The check only borrows, so solved segments survive a mismatch.
        assert!(Solution::check_barriers(&segments).is_err());
        assert_eq!(segments.len(), 2);

        let result = Solution::stitch(segments, Duration::ZERO);
        assert!(matches!(
            result,
            Err(MapfError::BarrierMismatch {
                segment: 0,
                agent: 0,
                end: (0, 1),
                start: (0, 2)
            })
        ));
    }

    #[test]
    fn test_verify() {
        let map = Map::from_file("map_file/test/empty-5-5.map").unwrap();
        let agents = vec![
            Agent {
                id: 0,
                start: (0, 0),
                waypoints: vec![(0, 1)],
                goal: (0, 2),
            },
            Agent {
                id: 1,
                start: (1, 1),
                waypoints: vec![],
                goal: (1, 1),
            },
        ];
        let first = segment(0, vec![vec![(0, 0), (0, 1)], vec![(1, 1)]]);
        let second = segment(1, vec![vec![(0, 1), (0, 2)], vec![(1, 1)]]);
        let solution = Solution::stitch(vec![first, second], Duration::ZERO).unwrap();
        assert!(solution.verify(&map, &agents));

        // Skipping the waypoint is rejected.
        let first = segment(0, vec![vec![(0, 0), (1, 0)], vec![(1, 1)]]);
        let second = segment(1, vec![vec![(1, 0), (0, 0)], vec![(1, 1)]]);
        let wrong = Solution::stitch(vec![first, second], Duration::ZERO).unwrap();
        assert!(!wrong.verify(&map, &agents));
    }
}
