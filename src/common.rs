mod highlevel;
mod lowlevel;

pub(crate) use highlevel::{edge_cost, HighLevelNode};
pub(crate) use lowlevel::LowLevelNode;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Deref;

use crate::map::Map;

/// Grid cell as `(row, column)`.
pub type Position = (usize, usize);

/// Cells occupied by one agent, one entry per timestep.
pub type Path = Vec<Position>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: usize,
    pub start: Position,
    #[serde(default)]
    pub waypoints: Vec<Position>,
    pub goal: Position,
}

impl Agent {
    pub fn verify(&self, map: &Map) -> bool {
        std::iter::once(&self.start)
            .chain(&self.waypoints)
            .chain(std::iter::once(&self.goal))
            .all(|&(x, y)| map.is_passable(x, y))
    }

    pub fn num_segments(&self) -> usize {
        self.waypoints.len() + 1
    }

    /// Cell the agent has to reach at the end of `segment`. Once the
    /// waypoints run out the agent keeps targeting its goal.
    pub fn segment_target(&self, segment: usize) -> Position {
        self.waypoints.get(segment).copied().unwrap_or(self.goal)
    }

    pub fn segment_start(&self, segment: usize) -> Position {
        match segment {
            0 => self.start,
            k => self.segment_target(k - 1),
        }
    }
}

/// Joint positions of every agent at one timestep, indexed by agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Configuration(pub Vec<Position>);

impl Configuration {
    /// First pair of agents sharing a cell, if any.
    pub fn first_collision(&self) -> Option<(usize, usize)> {
        let mut seen: HashMap<Position, usize> = HashMap::with_capacity(self.0.len());
        for (agent, position) in self.0.iter().enumerate() {
            if let Some(&other) = seen.get(position) {
                return Some((other, agent));
            }
            seen.insert(*position, agent);
        }
        None
    }

    pub fn is_injective(&self) -> bool {
        self.first_collision().is_none()
    }
}

impl Deref for Configuration {
    type Target = [Position];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromIterator<Position> for Configuration {
    fn from_iter<I: IntoIterator<Item = Position>>(iter: I) -> Self {
        Configuration(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_endpoints() {
        let agent = Agent {
            id: 0,
            start: (0, 0),
            waypoints: vec![(1, 1), (2, 2)],
            goal: (3, 3),
        };
        assert_eq!(agent.num_segments(), 3);
        assert_eq!(agent.segment_start(0), (0, 0));
        assert_eq!(agent.segment_target(0), (1, 1));
        assert_eq!(agent.segment_start(2), (2, 2));
        assert_eq!(agent.segment_target(2), (3, 3));
        // Past its last segment the agent rests on its goal.
        assert_eq!(agent.segment_start(4), (3, 3));
        assert_eq!(agent.segment_target(4), (3, 3));
    }

    #[test]
    fn test_configuration_collision() {
        let config: Configuration = vec![(0, 0), (0, 1), (0, 0)].into_iter().collect();
        assert_eq!(config.first_collision(), Some((0, 2)));
        assert!(!config.is_injective());
        assert_eq!(config[1], (0, 1));
        assert_eq!(config.len(), 3);
    }
}
