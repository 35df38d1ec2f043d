use mapf_waypoint::config::{Cli, Config};
use mapf_waypoint::map::Map;
use mapf_waypoint::orchestrator::Orchestrator;
use mapf_waypoint::output::{self, ScaleResult};
use mapf_waypoint::scenario::Scenario;

use anyhow::{bail, Context};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let cli = Cli::parse();

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(1)
        }
    }
}

/// Runs every configured experiment. Returns whether all segments of all
/// experiments were solved.
fn run(cli: &Cli) -> anyhow::Result<bool> {
    let config = Config::new(cli)?;
    config.validate()?;
    info!("{config:?}");

    let map = Map::from_file(&config.map_path)
        .with_context(|| format!("error loading map {}", config.map_path))?;
    let scenario = Scenario::load(&config.scen_path)
        .with_context(|| format!("error loading scenario {}", config.scen_path))?;
    if scenario.map_width != 0 && (scenario.map_width, scenario.map_height) != (map.width, map.height) {
        bail!(
            "scenario is for a {}x{} map but {} is {}x{}",
            scenario.map_width,
            scenario.map_height,
            config.map_path,
            map.width,
            map.height
        );
    }

    let output_dir = Path::new(&config.output_dir);
    let multi_scale = !config.multi_scale.is_empty();
    let mut all_solved = true;
    let mut results = Vec::new();

    for num_agents in config.agent_counts() {
        let agents = scenario.take_agents(num_agents);
        let dir = if multi_scale {
            output_dir.join(format!("exp_{}_agents", agents.len()))
        } else {
            output_dir.to_path_buf()
        };

        let wall_clock = Instant::now();
        let mut orchestrator = Orchestrator::new(&map, &agents, &config).context("invalid scenario")?;
        let outcome = orchestrator.run();
        match &outcome {
            Ok(solution) => {
                if !solution.verify(&map, &agents) {
                    bail!("solution for {} agents failed verification", agents.len());
                }
                info!(
                    "{} agents: total cost {} makespan {} in {:?}",
                    agents.len(),
                    solution.cost,
                    solution.makespan(),
                    solution.runtime
                );
            }
            Err(failure) => {
                error!(
                    "{} agents: stopped at segment {} after {} solved segments: {}",
                    agents.len(),
                    failure.segment,
                    failure.completed.len(),
                    failure.source
                );
                all_solved = false;
            }
        }

        let summary = output::write_experiment(&dir, &config, &agents, &outcome, wall_clock.elapsed())?;
        results.push(ScaleResult {
            agent_count: agents.len(),
            result: summary,
        });
    }

    if multi_scale {
        output::write_multi_scale_summary(output_dir, &results)?;
    }
    Ok(all_solved)
}
