use crate::common::Position;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MapfError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed grid (line {line}): {reason}")]
    MalformedGrid { line: usize, reason: String },

    #[error("malformed scenario (line {line}): {reason}")]
    MalformedScenario { line: usize, reason: String },

    #[error("segment {segment}: agent {agent} cannot reach {to:?} from {from:?}")]
    UnreachableWaypoint {
        segment: usize,
        agent: usize,
        from: Position,
        to: Position,
    },

    #[error("segment {segment} is infeasible: {reason}")]
    SegmentInfeasible { segment: usize, reason: String },

    #[error(
        "segment {segment} ran out of budget after {expanded} expansions ({elapsed_ms} ms) without a solution, cost lower bound {lower_bound}"
    )]
    BudgetExceeded {
        segment: usize,
        expanded: usize,
        elapsed_ms: u128,
        lower_bound: usize,
    },

    #[error("segment {segment}: no legal joint move for agent {agent} from the start configuration")]
    ResolverDeadlock { segment: usize, agent: usize },

    #[error("segment {segment}: agent {agent} ends at {end:?} but the next segment starts at {start:?}")]
    BarrierMismatch {
        segment: usize,
        agent: usize,
        end: Position,
        start: Position,
    },
}

impl MapfError {
    /// Segment the error belongs to, if it came out of a segment search.
    pub fn segment(&self) -> Option<usize> {
        match self {
            MapfError::UnreachableWaypoint { segment, .. }
            | MapfError::SegmentInfeasible { segment, .. }
            | MapfError::BudgetExceeded { segment, .. }
            | MapfError::ResolverDeadlock { segment, .. }
            | MapfError::BarrierMismatch { segment, .. } => Some(*segment),
            _ => None,
        }
    }

    pub(crate) fn grid(line: usize, reason: impl Into<String>) -> Self {
        MapfError::MalformedGrid {
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn scenario(line: usize, reason: impl Into<String>) -> Self {
        MapfError::MalformedScenario {
            line,
            reason: reason.into(),
        }
    }
}
