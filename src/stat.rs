use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub costs: usize,
    pub makespan: usize,
    pub time_us: usize,
    pub high_level_expand_nodes: usize,
    pub low_level_expand_nodes: usize,
    pub resolver_failures: usize,
    pub revisits: usize,
    pub improvements: usize,
}

impl Stats {
    pub(crate) fn print(&self, segment: usize) {
        info!(
            "Segment {segment} Cost {:?} Makespan {:?} Time(microseconds) {:?} High level expand nodes number: {:?} Low level expand nodes number {:?} Resolver failures {:?} Revisits {:?} Improvements {:?}",
            self.costs,
            self.makespan,
            self.time_us,
            self.high_level_expand_nodes,
            self.low_level_expand_nodes,
            self.resolver_failures,
            self.revisits,
            self.improvements
        );
    }
}
