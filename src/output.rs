use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::common::{Agent, Position};
use crate::config::Config;
use crate::orchestrator::RunFailure;
use crate::scenario::Scenario;
use crate::solution::{SegmentSolution, Solution};
use crate::stat::Stats;

/// On-disk plan of one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFile {
    pub segment: usize,
    pub cost: usize,
    pub makespan: usize,
    pub solved: bool,
    pub paths: Vec<AgentPath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPath {
    pub agent: usize,
    pub path: Vec<Position>,
}

impl From<&SegmentSolution> for SegmentFile {
    fn from(segment: &SegmentSolution) -> Self {
        SegmentFile {
            segment: segment.index,
            cost: segment.cost,
            makespan: segment.makespan,
            solved: true,
            paths: segment
                .paths
                .iter()
                .enumerate()
                .map(|(agent, path)| AgentPath {
                    agent,
                    path: path.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentInfo {
    pub map_file: String,
    pub scenario_file: String,
    pub num_agents: usize,
    pub max_waypoints: usize,
    pub total_segments: usize,
    pub command: String,
    pub seed: u64,
    pub total_timeout_sec: u64,
    pub per_segment_timeout_ms: u128,
    pub anytime: bool,
}

impl ExperimentInfo {
    pub fn new(config: &Config, agents: &[Agent]) -> Self {
        let max_waypoints = agents
            .iter()
            .map(|agent| agent.waypoints.len())
            .max()
            .unwrap_or(0);
        let total_segments = max_waypoints + 1;
        ExperimentInfo {
            map_file: config.map_path.clone(),
            scenario_file: config.scen_path.clone(),
            num_agents: agents.len(),
            max_waypoints,
            total_segments,
            command: std::env::args().collect::<Vec<_>>().join(" "),
            seed: config.seed,
            total_timeout_sec: config.time_limit_sec,
            per_segment_timeout_ms: config.segment_time_limit(total_segments).as_millis(),
            anytime: config.anytime,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalResults {
    pub total_cost: usize,
    pub total_runtime_ms: f64,
    pub wall_clock_time_ms: f64,
    pub max_makespan: usize,
    pub total_makespan: usize,
    pub num_segments: usize,
    pub all_segments_solved: bool,
    pub failed_segment: Option<usize>,
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentResult {
    pub segment_id: usize,
    pub cost: usize,
    pub makespan: usize,
    pub runtime_ms: f64,
    pub solved: bool,
    pub complete: bool,
    pub stats: Stats,
    pub output_file: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub total_agents: usize,
    pub max_waypoints_per_agent: usize,
    pub total_waypoint_to_waypoint_transitions: usize,
    pub total_path_segments: usize,
    pub path_lengths: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    pub avg_runtime_per_segment_ms: f64,
    pub avg_cost_per_segment: f64,
    pub avg_cost_per_agent: f64,
    /// Cost per millisecond of wall-clock time.
    pub cost_efficiency: f64,
}

/// Contents of `waypoint_summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub experiment_info: ExperimentInfo,
    pub global_results: GlobalResults,
    pub segment_results: Vec<SegmentResult>,
    pub agent_summary: AgentSummary,
    pub performance_metrics: PerformanceMetrics,
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

impl Summary {
    pub fn new(
        experiment_info: ExperimentInfo,
        agents: &[Agent],
        outcome: &Result<Solution, RunFailure>,
        wall_clock: Duration,
    ) -> Self {
        let (segments, path_lengths, failure) = match outcome {
            Ok(solution) => (solution.segments.as_slice(), solution.path_lengths(), None),
            Err(failure) => (failure.completed.as_slice(), Vec::new(), Some(failure)),
        };

        let mut segment_results: Vec<SegmentResult> = segments
            .iter()
            .map(|segment| SegmentResult {
                segment_id: segment.index,
                cost: segment.cost,
                makespan: segment.makespan,
                runtime_ms: millis(segment.runtime),
                solved: true,
                complete: segment.complete,
                stats: segment.stats.clone(),
                output_file: Some(segment_file_name(segment.index)),
            })
            .collect();
        if let Some(failure) = failure {
            segment_results.push(SegmentResult {
                segment_id: failure.segment,
                cost: 0,
                makespan: 0,
                runtime_ms: millis(failure.runtime.saturating_sub(segments.iter().map(|s| s.runtime).sum())),
                solved: false,
                complete: false,
                stats: failure.stats.clone(),
                output_file: None,
            });
        }

        let total_cost: usize = segments.iter().map(|segment| segment.cost).sum();
        let total_runtime_ms: f64 = segment_results.iter().map(|segment| segment.runtime_ms).sum();
        let num_segments = segment_results.len();
        let num_agents = agents.len();
        let max_waypoints = experiment_info.max_waypoints;

        Summary {
            global_results: GlobalResults {
                total_cost,
                total_runtime_ms,
                wall_clock_time_ms: millis(wall_clock),
                max_makespan: segments.iter().map(|segment| segment.makespan).max().unwrap_or(0),
                total_makespan: segments.iter().map(|segment| segment.makespan).sum(),
                num_segments,
                all_segments_solved: failure.is_none(),
                failed_segment: failure.map(|failure| failure.segment),
                failure: failure.map(|failure| failure.source.to_string()),
            },
            segment_results,
            agent_summary: AgentSummary {
                total_agents: num_agents,
                max_waypoints_per_agent: max_waypoints,
                total_waypoint_to_waypoint_transitions: agents
                    .iter()
                    .map(|agent| agent.waypoints.len())
                    .sum(),
                total_path_segments: (max_waypoints + 1) * num_agents,
                path_lengths,
            },
            performance_metrics: PerformanceMetrics {
                avg_runtime_per_segment_ms: ratio(total_runtime_ms, num_segments as f64),
                avg_cost_per_segment: ratio(total_cost as f64, num_segments as f64),
                avg_cost_per_agent: ratio(total_cost as f64, num_agents as f64),
                cost_efficiency: ratio(total_cost as f64, millis(wall_clock)),
            },
            experiment_info,
        }
    }

    pub fn to_text(&self) -> String {
        let info = &self.experiment_info;
        let global = &self.global_results;
        let metrics = &self.performance_metrics;
        let mut text = String::new();

        let _ = writeln!(text, "Multi-Waypoint LaCAM Results Summary");
        let _ = writeln!(text, "{}\n", "=".repeat(40));
        let _ = writeln!(text, "Map: {}", info.map_file);
        let _ = writeln!(text, "Scenario: {}", info.scenario_file);
        let _ = writeln!(text, "Command: {}\n", info.command);

        let _ = writeln!(text, "Agent Configuration:");
        let _ = writeln!(text, "  Total Agents: {}", info.num_agents);
        let _ = writeln!(text, "  Max Waypoints per Agent: {}", info.max_waypoints);
        let _ = writeln!(text, "  Total Path Segments: {}\n", self.agent_summary.total_path_segments);

        let _ = writeln!(text, "Global Results:");
        let _ = writeln!(text, "  Total Cost (SOC): {}", global.total_cost);
        let _ = writeln!(text, "  Max Makespan: {}", global.max_makespan);
        let _ = writeln!(text, "  Total Runtime: {:.0}ms", global.total_runtime_ms);
        let _ = writeln!(text, "  Wall-Clock Time: {:.0}ms", global.wall_clock_time_ms);
        let _ = writeln!(text, "  All Segments Solved: {}", global.all_segments_solved);
        if let Some(failure) = &global.failure {
            let _ = writeln!(text, "  Failure: {failure}");
        }
        let _ = writeln!(text);

        let _ = writeln!(text, "Performance Metrics:");
        let _ = writeln!(text, "  Avg Runtime per Segment: {:.1}ms", metrics.avg_runtime_per_segment_ms);
        let _ = writeln!(text, "  Avg Cost per Segment: {:.1}", metrics.avg_cost_per_segment);
        let _ = writeln!(text, "  Avg Cost per Agent: {:.1}\n", metrics.avg_cost_per_agent);

        let _ = writeln!(text, "Segment Breakdown:");
        for segment in &self.segment_results {
            let _ = writeln!(
                text,
                "  Segment {}: cost={}, makespan={}, runtime={:.0}ms, solved={}",
                segment.segment_id, segment.cost, segment.makespan, segment.runtime_ms, segment.solved
            );
        }
        text
    }
}

pub fn segment_file_name(index: usize) -> String {
    format!("segment_{index}.yaml")
}

pub fn write_segment(dir: &Path, segment: &SegmentSolution) -> anyhow::Result<PathBuf> {
    let path = dir.join(segment_file_name(segment.index));
    let yaml = serde_yaml::to_string(&SegmentFile::from(segment))?;
    fs::write(&path, yaml).with_context(|| format!("cannot write {}", path.display()))?;
    Ok(path)
}

pub fn write_summary(dir: &Path, summary: &Summary) -> anyhow::Result<()> {
    let json_path = dir.join("waypoint_summary.json");
    fs::write(&json_path, serde_json::to_string_pretty(summary)?)
        .with_context(|| format!("cannot write {}", json_path.display()))?;
    let text_path = dir.join("waypoint_summary.txt");
    fs::write(&text_path, summary.to_text())
        .with_context(|| format!("cannot write {}", text_path.display()))?;
    info!("Summary saved to {}", json_path.display());
    Ok(())
}

/// Writes every solved segment, the agents that were run and the summaries
/// of one experiment into `dir`.
pub fn write_experiment(
    dir: &Path,
    config: &Config,
    agents: &[Agent],
    outcome: &Result<Solution, RunFailure>,
    wall_clock: Duration,
) -> anyhow::Result<Summary> {
    fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;

    let segments = match outcome {
        Ok(solution) => &solution.segments,
        Err(failure) => &failure.completed,
    };
    for segment in segments {
        write_segment(dir, segment)?;
    }

    let agents_path = dir.join("agents.yaml");
    Scenario::write_agents_to_yaml(&agents_path.to_string_lossy(), &config.map_path, agents)?;

    let summary = Summary::new(ExperimentInfo::new(config, agents), agents, outcome, wall_clock);
    write_summary(dir, &summary)?;
    Ok(summary)
}

/// One experiment of a multi-scale run.
#[derive(Debug, Clone, Serialize)]
pub struct ScaleResult {
    pub agent_count: usize,
    pub result: Summary,
}

pub fn multi_scale_text(results: &[ScaleResult]) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "Multi-Scale LaCAM Results Summary");
    let _ = writeln!(text, "{}\n", "=".repeat(40));

    let _ = writeln!(text, "Experiment Results Summary:");
    let _ = writeln!(text, "| Agents | Runtime | Total Cost | Cost/Agent | Segments | Success |");
    let _ = writeln!(text, "|--------|---------|------------|------------|----------|---------|");
    for scale in results {
        let global = &scale.result.global_results;
        let _ = writeln!(
            text,
            "| {:>6} | {:>6.2}s | {:>10} | {:>10.1} | {:>8} | {:>7} |",
            scale.agent_count,
            global.total_runtime_ms / 1000.0,
            global.total_cost,
            scale.result.performance_metrics.avg_cost_per_agent,
            global.num_segments,
            if global.all_segments_solved { "yes" } else { "no" }
        );
    }

    let _ = writeln!(text, "\nDetailed Results:");
    for scale in results {
        let global = &scale.result.global_results;
        let _ = writeln!(text, "  Agents: {}", scale.agent_count);
        let _ = writeln!(text, "    Total Cost: {}", global.total_cost);
        let _ = writeln!(text, "    Max Makespan: {}", global.max_makespan);
        let _ = writeln!(text, "    Total Runtime: {:.0}ms", global.total_runtime_ms);
        let _ = writeln!(text, "    Wall-Clock Time: {:.0}ms", global.wall_clock_time_ms);
        let _ = writeln!(text, "    All Segments Solved: {}", global.all_segments_solved);
        let _ = writeln!(text, "    Num Segments: {}\n", global.num_segments);
    }

    if !results.is_empty() {
        let count = results.len() as f64;
        let average = |metric: fn(&PerformanceMetrics) -> f64| {
            results
                .iter()
                .map(|scale| metric(&scale.result.performance_metrics))
                .sum::<f64>()
                / count
        };
        let _ = writeln!(text, "Performance Metrics (Average across all experiments):");
        let _ = writeln!(text, "  Avg Runtime per Segment: {:.1}ms", average(|m| m.avg_runtime_per_segment_ms));
        let _ = writeln!(text, "  Avg Cost per Segment: {:.1}", average(|m| m.avg_cost_per_segment));
        let _ = writeln!(text, "  Avg Cost per Agent: {:.1}", average(|m| m.avg_cost_per_agent));
        let _ = writeln!(text, "  Avg Cost Efficiency (cost/ms): {:.4}", average(|m| m.cost_efficiency));
    }
    text
}

pub fn write_multi_scale_summary(dir: &Path, results: &[ScaleResult]) -> anyhow::Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    let json_path = dir.join("multi_scale_summary.json");
    fs::write(&json_path, serde_json::to_string_pretty(results)?)
        .with_context(|| format!("cannot write {}", json_path.display()))?;
    fs::write(dir.join("multi_scale_summary.txt"), multi_scale_text(results))
        .with_context(|| format!("cannot write multi-scale summary in {}", dir.display()))?;
    info!("Multi-scale summary saved to {}", json_path.display());
    Ok(())
}
