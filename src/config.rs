use anyhow::{anyhow, Context};
use clap::Parser;
use serde::Deserialize;
use std::time::Duration;

#[derive(Parser, Debug, Default)]
#[command(
    name = "Waypoint MAPF",
    about = "Ordered-waypoint multi-agent pathfinding with lazy configuration search.",
    version = "0.1"
)]
pub struct Cli {
    #[arg(long, help = "Path to a YAML config file")]
    pub config: Option<String>,

    #[arg(long, help = "Path to the map file")]
    pub map_path: Option<String>,

    #[arg(long, help = "Path to the waypoint scenario file (.scen or .yaml)")]
    pub scen_path: Option<String>,

    #[arg(long, help = "Directory receiving segment plans and summaries")]
    pub output_dir: Option<String>,

    #[arg(long, help = "Number of agents taken from the scenario [default: all]")]
    pub num_agents: Option<usize>,

    #[arg(
        long,
        help = "Run one experiment per agent count, e.g. 100,200,300",
        value_delimiter = ','
    )]
    pub multi_scale: Vec<usize>,

    #[arg(long, help = "Seed for the random number generator")]
    pub seed: Option<u64>,

    #[arg(long, help = "Total time limit in seconds, split evenly among segments")]
    pub time_limit_sec: Option<u64>,

    #[arg(long, help = "Per-segment time limit in milliseconds, overrides the split")]
    pub segment_time_limit_ms: Option<u64>,

    #[arg(long, help = "Per-segment limit on high-level node expansions")]
    pub max_nodes: Option<usize>,

    #[arg(long, help = "Maximum number of timesteps in one segment")]
    pub max_horizon: Option<usize>,

    #[arg(long, help = "Maximum priority inheritance depth")]
    pub max_push_depth: Option<usize>,

    #[arg(
        long,
        help = "Return the first solution of each segment instead of refining it",
        default_value_t = false
    )]
    pub no_anytime: bool,

    #[arg(
        long,
        help = "Do not precompute the next segment's distance tables in the background",
        default_value_t = false
    )]
    pub no_prefetch: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub map_path: String,
    pub scen_path: String,
    pub output_dir: String,
    pub num_agents: Option<usize>,
    pub multi_scale: Vec<usize>,
    pub seed: u64,
    pub time_limit_sec: u64,
    pub segment_time_limit_ms: Option<u64>,
    pub max_nodes: Option<usize>,
    pub max_horizon: Option<usize>,
    pub max_push_depth: Option<usize>,
    pub anytime: bool,
    pub prefetch_distances: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            map_path: "map_file/test/empty-5-5.map".to_string(),
            scen_path: "map_file/test/empty-5-5-wp.scen".to_string(),
            output_dir: "result".to_string(),
            num_agents: None,
            multi_scale: Vec::new(),
            seed: 42,
            time_limit_sec: 100,
            segment_time_limit_ms: None,
            max_nodes: None,
            max_horizon: None,
            max_push_depth: None,
            anytime: true,
            prefetch_distances: true,
        }
    }
}

impl Config {
    pub fn new(cli: &Cli) -> anyhow::Result<Self> {
        let config = if let Some(config_file) = cli.config.as_ref() {
            let config_str = std::fs::read_to_string(config_file)
                .with_context(|| format!("cannot read config file: {config_file}"))?;
            Config::from_yaml_str(&config_str)
                .with_context(|| format!("error with config file: {config_file}"))?
        } else {
            Config::default()
        };
        Ok(config.override_from_command_line(cli))
    }

    pub fn from_yaml_str(config_str: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(config_str)?)
    }

    pub fn override_from_command_line(mut self, cli: &Cli) -> Self {
        if let Some(map_path) = &cli.map_path {
            self.map_path = map_path.clone();
        }
        if let Some(scen_path) = &cli.scen_path {
            self.scen_path = scen_path.clone();
        }
        if let Some(output_dir) = &cli.output_dir {
            self.output_dir = output_dir.clone();
        }
        if cli.num_agents.is_some() {
            self.num_agents = cli.num_agents;
        }
        if !cli.multi_scale.is_empty() {
            self.multi_scale = cli.multi_scale.clone();
        }
        if let Some(seed) = cli.seed {
            self.seed = seed;
        }
        if let Some(time_limit_sec) = cli.time_limit_sec {
            self.time_limit_sec = time_limit_sec;
        }
        if cli.segment_time_limit_ms.is_some() {
            self.segment_time_limit_ms = cli.segment_time_limit_ms;
        }
        if cli.max_nodes.is_some() {
            self.max_nodes = cli.max_nodes;
        }
        if cli.max_horizon.is_some() {
            self.max_horizon = cli.max_horizon;
        }
        if cli.max_push_depth.is_some() {
            self.max_push_depth = cli.max_push_depth;
        }
        if cli.no_anytime {
            self.anytime = false;
        }
        if cli.no_prefetch {
            self.prefetch_distances = false;
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.map_path.is_empty() || self.scen_path.is_empty() {
            return Err(anyhow!("Both a map path and a scenario path are required"));
        }
        if self.time_limit_sec == 0 && self.segment_time_limit_ms.is_none() {
            return Err(anyhow!("Time limit must be at least one second"));
        }
        if self.segment_time_limit_ms == Some(0) {
            return Err(anyhow!("Per-segment time limit must be positive"));
        }
        if self.num_agents == Some(0) || self.multi_scale.contains(&0) {
            return Err(anyhow!("Agent counts must be positive"));
        }
        if self.max_nodes == Some(0) {
            return Err(anyhow!("Node budget must be positive"));
        }
        if self.max_push_depth == Some(0) {
            return Err(anyhow!("Priority inheritance depth must be at least 1"));
        }
        Ok(())
    }

    /// Wall-clock budget of one segment: the explicit per-segment limit, or
    /// the total limit split evenly with a floor of one second.
    pub fn segment_time_limit(&self, num_segments: usize) -> Duration {
        match self.segment_time_limit_ms {
            Some(ms) => Duration::from_millis(ms),
            None => {
                let per_segment = self.time_limit_sec / num_segments.max(1) as u64;
                Duration::from_secs(per_segment.max(1))
            }
        }
    }

    /// Agent counts of the experiments to run; `None` keeps every agent.
    pub fn agent_counts(&self) -> Vec<Option<usize>> {
        if self.multi_scale.is_empty() {
            vec![self.num_agents]
        } else {
            self.multi_scale.iter().copied().map(Some).collect()
        }
    }
}
