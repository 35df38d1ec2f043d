use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::common::{Agent, Position};
use crate::error::MapfError;
use crate::map::Map;

/// Agent record of a YAML scenario. Cells are `[row, column]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AgentRecord {
    start: Position,
    #[serde(default)]
    waypoints: Vec<Position>,
    goal: Position,
}

#[derive(Debug, Serialize, Deserialize)]
struct ScenarioYaml {
    #[serde(default)]
    map: String,
    agents: Vec<AgentRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub map: String,
    pub map_width: usize,
    pub map_height: usize,
    pub agents: Vec<Agent>,
}

impl Scenario {
    /// Loads a `.yaml`/`.yml` scenario, anything else is read as a waypoint
    /// `.scen` file.
    pub fn load(path: &str) -> Result<Scenario, MapfError> {
        let is_yaml = Path::new(path)
            .extension()
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if is_yaml {
            return Self::load_from_yaml(path);
        }
        let content = std::fs::read_to_string(path).map_err(|source| MapfError::Io {
            path: path.to_string(),
            source,
        })?;
        let scenario = Self::parse_scen(&content)?;
        info!("Loaded {} agents from {path}", scenario.agents.len());
        Ok(scenario)
    }

    /// Parses `bucket map width height sx sy gx gy opt [K wx1 wy1 ...]`
    /// records, x being the column and y the row.
    pub fn parse_scen(content: &str) -> Result<Scenario, MapfError> {
        let mut scenario = Scenario {
            map: String::new(),
            map_width: 0,
            map_height: 0,
            agents: Vec::new(),
        };

        for (index, line) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with("version") {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 9 {
                return Err(MapfError::scenario(
                    line_no,
                    format!("expected at least 9 fields, found {}", parts.len()),
                ));
            }
            let field = |i: usize| -> Result<usize, MapfError> {
                parts[i].parse().map_err(|_| {
                    MapfError::scenario(line_no, format!("field {} is not a number: {:?}", i + 1, parts[i]))
                })
            };

            let waypoints = if parts.len() == 9 {
                Vec::new()
            } else {
                let count = field(9)?;
                let expected = count
                    .checked_mul(2)
                    .and_then(|n| n.checked_add(10))
                    .ok_or_else(|| MapfError::scenario(line_no, format!("waypoint count {count} is too large")))?;
                if parts.len() != expected {
                    return Err(MapfError::scenario(
                        line_no,
                        format!("{count} waypoints need {expected} fields, found {}", parts.len()),
                    ));
                }
                (0..count)
                    .map(|k| Ok((field(11 + 2 * k)?, field(10 + 2 * k)?)))
                    .collect::<Result<Vec<Position>, MapfError>>()?
            };

            if scenario.map.is_empty() {
                scenario.map = parts[1].to_string();
                scenario.map_width = field(2)?;
                scenario.map_height = field(3)?;
            }

            scenario.agents.push(Agent {
                id: scenario.agents.len(),
                start: (field(5)?, field(4)?),
                waypoints,
                goal: (field(7)?, field(6)?),
            });
        }

        Ok(scenario)
    }

    pub fn load_from_yaml(path: &str) -> Result<Scenario, MapfError> {
        let file = File::open(path).map_err(|source| MapfError::Io {
            path: path.to_string(),
            source,
        })?;
        let yaml: ScenarioYaml = serde_yaml::from_reader(BufReader::new(file))
            .map_err(|err| MapfError::scenario(err.location().map_or(0, |l| l.line()), err.to_string()))?;
        Ok(yaml.into_scenario())
    }

    pub fn from_yaml_str(content: &str) -> Result<Scenario, MapfError> {
        let yaml: ScenarioYaml = serde_yaml::from_str(content)
            .map_err(|err| MapfError::scenario(err.location().map_or(0, |l| l.line()), err.to_string()))?;
        Ok(yaml.into_scenario())
    }

    pub(crate) fn write_agents_to_yaml(path: &str, map: &str, agents: &[Agent]) -> anyhow::Result<()> {
        let yaml = ScenarioYaml {
            map: map.to_string(),
            agents: agents
                .iter()
                .map(|agent| AgentRecord {
                    start: agent.start,
                    waypoints: agent.waypoints.clone(),
                    goal: agent.goal,
                })
                .collect(),
        };
        let file = File::create(path)?;
        let mut writer = io::BufWriter::new(file);
        writer.write_all(serde_yaml::to_string(&yaml)?.as_bytes())?;
        Ok(())
    }

    pub fn max_waypoints(&self) -> usize {
        self.agents
            .iter()
            .map(|agent| agent.waypoints.len())
            .max()
            .unwrap_or(0)
    }

    /// First `num_agents` agents, or all of them.
    pub fn take_agents(&self, num_agents: Option<usize>) -> Vec<Agent> {
        let available = self.agents.len();
        let count = match num_agents {
            Some(n) if n > available => {
                warn!("Requested {n} agents but the scenario only has {available}");
                available
            }
            Some(n) => n,
            None => available,
        };
        self.agents[..count].to_vec()
    }
}

impl ScenarioYaml {
    fn into_scenario(self) -> Scenario {
        Scenario {
            map: self.map,
            map_width: 0,
            map_height: 0,
            agents: self
                .agents
                .into_iter()
                .enumerate()
                .map(|(id, record)| Agent {
                    id,
                    start: record.start,
                    waypoints: record.waypoints,
                    goal: record.goal,
                })
                .collect(),
        }
    }
}

/// Rejects agents whose cells are blocked or off the map, and duplicate
/// starts.
pub fn validate_agents(map: &Map, agents: &[Agent]) -> Result<(), MapfError> {
    let mut starts: HashMap<Position, usize> = HashMap::with_capacity(agents.len());
    for agent in agents {
        if !agent.verify(map) {
            return Err(MapfError::scenario(
                0,
                format!("agent {} has a cell that is blocked or off the map", agent.id),
            ));
        }
        if let Some(other) = starts.insert(agent.start, agent.id) {
            return Err(MapfError::scenario(
                0,
                format!("agents {other} and {} share start {:?}", agent.id, agent.start),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_scenario() {
        let scen = Scenario::load("map_file/test/empty-5-5-wp.scen").expect("Error loading scen");
        assert_eq!(scen.map, "empty-5-5.map");
        assert_eq!((scen.map_width, scen.map_height), (5, 5));
        assert_eq!(scen.max_waypoints(), 1);

        let answer = [
            Agent {
                id: 0,
                start: (0, 0),
                waypoints: vec![(2, 2)],
                goal: (4, 4),
            },
            Agent {
                id: 1,
                start: (4, 4),
                waypoints: vec![(2, 3)],
                goal: (0, 0),
            },
            Agent {
                id: 2,
                start: (0, 4),
                waypoints: vec![],
                goal: (0, 4),
            },
        ];
        assert_eq!(scen.agents, answer);

        let map = Map::from_file("map_file/test/empty-5-5.map").unwrap();
        validate_agents(&map, &scen.agents).unwrap();
    }

    #[test]
    fn test_malformed_scen() {
        let short = "version 1\n0 m.map 5 5 0 0 4\n";
        assert!(matches!(
            Scenario::parse_scen(short),
            Err(MapfError::MalformedScenario { line: 2, .. })
        ));

        let bad_count = "0 m.map 5 5 0 0 4 4 8 2 1 1\n";
        assert!(matches!(
            Scenario::parse_scen(bad_count),
            Err(MapfError::MalformedScenario { line: 1, .. })
        ));

        let huge_count = "0 m.map 5 5 0 0 4 4 8 9223372036854775808\n";
        assert!(matches!(
            Scenario::parse_scen(huge_count),
            Err(MapfError::MalformedScenario { line: 1, .. })
        ));
        let overflowing_count = format!("0 m.map 5 5 0 0 4 4 8 {}\n", usize::MAX);
        assert!(matches!(
            Scenario::parse_scen(&overflowing_count),
            Err(MapfError::MalformedScenario { line: 1, .. })
        ));

        let not_a_number = "0 m.map 5 5 a 0 4 4 8\n";
        assert!(Scenario::parse_scen(not_a_number).is_err());
    }

    #[test]
    fn test_yaml_scenario() {
        let scen = Scenario::from_yaml_str(
            "agents:\n  - start: [0, 0]\n    waypoints: [[1, 2]]\n    goal: [3, 3]\n  - start: [4, 4]\n    goal: [0, 4]\n",
        )
        .unwrap();
        assert_eq!(scen.agents.len(), 2);
        assert_eq!(scen.agents[0].waypoints, vec![(1, 2)]);
        assert_eq!(scen.agents[1].id, 1);
        assert!(scen.agents[1].waypoints.is_empty());
    }

    #[test]
    fn test_take_agents() {
        let scen = Scenario::load("map_file/test/empty-5-5-wp.scen").unwrap();
        assert_eq!(scen.take_agents(Some(2)).len(), 2);
        assert_eq!(scen.take_agents(Some(10)).len(), 3);
        assert_eq!(scen.take_agents(None).len(), 3);
    }

    #[test]
    fn test_validate_agents() {
        let map = Map::from_file("map_file/test/test.map").unwrap();
        let blocked = [Agent {
            id: 0,
            start: (0, 0),
            waypoints: vec![(1, 1)],
            goal: (2, 2),
        }];
        assert!(validate_agents(&map, &blocked).is_err());

        let shared_start = [
            Agent {
                id: 0,
                start: (0, 0),
                waypoints: vec![],
                goal: (2, 2),
            },
            Agent {
                id: 1,
                start: (0, 0),
                waypoints: vec![],
                goal: (0, 2),
            },
        ];
        assert!(validate_agents(&map, &shared_start).is_err());
    }
}
