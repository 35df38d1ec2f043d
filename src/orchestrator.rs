use crate::algorithm::DistanceOracle;
use crate::common::{Agent, Configuration, Position};
use crate::config::Config;
use crate::error::MapfError;
use crate::map::Map;
use crate::scenario::validate_agents;
use crate::solution::{SegmentSolution, Solution};
use crate::solver::{Budget, LaCAM, Segment, Solver};
use crate::stat::Stats;

use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument};

/// A run that stopped at its first failing segment.
#[derive(Debug, Error)]
#[error("segment {segment} failed: {source}")]
pub struct RunFailure {
    pub segment: usize,
    #[source]
    pub source: MapfError,
    /// Segments solved before the failure.
    pub completed: Vec<SegmentSolution>,
    /// Search statistics of the failed attempt.
    pub stats: Stats,
    pub runtime: Duration,
}

/// Splits an ordered-waypoint instance into barrier-synchronised segments
/// and solves them one after another.
pub struct Orchestrator<'a> {
    map: &'a Map,
    agents: &'a [Agent],
    config: &'a Config,
    oracle: DistanceOracle,
}

impl<'a> Orchestrator<'a> {
    pub fn new(map: &'a Map, agents: &'a [Agent], config: &'a Config) -> Result<Self, MapfError> {
        validate_agents(map, agents)?;
        Ok(Orchestrator {
            map,
            agents,
            config,
            oracle: DistanceOracle::new(),
        })
    }

    pub fn num_segments(&self) -> usize {
        self.agents
            .iter()
            .map(Agent::num_segments)
            .max()
            .unwrap_or(1)
    }

    pub fn segment_targets(&self, index: usize) -> Configuration {
        self.agents
            .iter()
            .map(|agent| agent.segment_target(index))
            .collect()
    }

    pub fn initial_configuration(&self) -> Configuration {
        self.agents.iter().map(|agent| agent.start).collect()
    }

    #[instrument(skip_all, name = "orchestrator", fields(agents = self.agents.len()))]
    pub fn run(&mut self) -> Result<Solution, RunFailure> {
        let run_start = Instant::now();
        let num_segments = self.num_segments();
        let time_limit = self.config.segment_time_limit(num_segments);
        info!(
            "Solving {} agents in {num_segments} segments, {time_limit:?} per segment",
            self.agents.len()
        );

        let mut starts = self.initial_configuration();
        let mut completed: Vec<SegmentSolution> = Vec::with_capacity(num_segments);

        for index in 0..num_segments {
            let segment = Segment {
                index,
                starts,
                goals: self.segment_targets(index),
            };
            match self.solve_segment(&segment, num_segments, time_limit) {
                Ok(solution) => {
                    info!(
                        "Segment {index} solved: cost {} makespan {} in {:?}",
                        solution.cost, solution.makespan, solution.runtime
                    );
                    starts = solution.final_configuration();
                    completed.push(solution);
                }
                Err((source, stats)) => {
                    error!("Segment {index} failed: {source}");
                    return Err(RunFailure {
                        segment: index,
                        source,
                        completed,
                        stats,
                        runtime: run_start.elapsed(),
                    });
                }
            }
        }

        if let Err(source) = Solution::check_barriers(&completed) {
            error!("Stitching failed: {source}");
            return Err(RunFailure {
                segment: source.segment().unwrap_or(0),
                source,
                completed,
                stats: Stats::default(),
                runtime: run_start.elapsed(),
            });
        }
        let solution = Solution::join(completed, run_start.elapsed());
        info!(
            "Solved all segments: total cost {} makespan {} in {:?}",
            solution.cost,
            solution.makespan(),
            solution.runtime
        );
        Ok(solution)
    }

    /// Solves one segment while a scoped worker fills the oracle with the
    /// next segment's distance tables. Failures keep the search statistics.
    fn solve_segment(
        &mut self,
        segment: &Segment,
        num_segments: usize,
        time_limit: Duration,
    ) -> Result<SegmentSolution, (MapfError, Stats)> {
        let dists = self.oracle.tables_for(self.map, &segment.goals);
        let next_targets: Vec<Position> =
            if self.config.prefetch_distances && segment.index + 1 < num_segments {
                self.oracle.missing(&self.segment_targets(segment.index + 1))
            } else {
                Vec::new()
            };

        let map = self.map;
        let config = self.config;
        let budget = Budget::new(Some(time_limit), config.max_nodes);
        let (result, prefetched) = thread::scope(|scope| {
            let prefetch = (!next_targets.is_empty())
                .then(|| scope.spawn(|| DistanceOracle::compute(map, &next_targets)));
            let mut solver = LaCAM::new(map, config);
            let result = solver
                .solve(segment, &dists, &budget)
                .map_err(|source| (source, solver.stats().clone()));
            let prefetched = prefetch
                .and_then(|handle| handle.join().ok())
                .unwrap_or_default();
            (result, prefetched)
        });
        if !prefetched.is_empty() {
            debug!("prefetched {} distance tables", prefetched.len());
            self.oracle.insert_all(prefetched);
        }

        let mut solution = SegmentSolution::new(segment.index, result?, budget.elapsed());
        solution.pad_to_makespan();
        Ok(solution)
    }
}
