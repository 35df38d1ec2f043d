mod lacam;

pub use lacam::LaCAM;

use crate::algorithm::DistanceTable;
use crate::common::{Configuration, Path};
use crate::error::MapfError;
use crate::stat::Stats;

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Point-to-point sub-problem: every agent moves from `starts[i]` to
/// `goals[i]`, all agents arriving together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub starts: Configuration,
    pub goals: Configuration,
}

/// Raw solver output for one segment.
#[derive(Debug, Clone)]
pub struct SegmentPlan {
    /// One path per agent, each ending on the agent's final arrival.
    pub paths: Vec<Path>,
    pub cost: usize,
    /// True when the search space was exhausted, so no cheaper plan exists
    /// within the explored graph.
    pub complete: bool,
    pub stats: Stats,
}

/// Search budget checked cooperatively at every expansion.
#[derive(Debug, Clone)]
pub struct Budget {
    start: Instant,
    time_limit: Option<Duration>,
    max_nodes: Option<usize>,
}

impl Budget {
    pub fn new(time_limit: Option<Duration>, max_nodes: Option<usize>) -> Self {
        Budget {
            start: Instant::now(),
            time_limit,
            max_nodes,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn timed_out(&self) -> bool {
        self.time_limit
            .is_some_and(|limit| self.start.elapsed() >= limit)
    }

    pub fn exhausted(&self, expanded: usize) -> bool {
        self.max_nodes.is_some_and(|max| expanded >= max) || self.timed_out()
    }
}

pub trait Solver {
    fn solve(
        &mut self,
        segment: &Segment,
        dists: &[Arc<DistanceTable>],
        budget: &Budget,
    ) -> Result<SegmentPlan, MapfError>;
}
