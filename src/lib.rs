pub mod algorithm;
pub mod common;
pub mod config;
pub mod error;
pub mod map;
pub mod orchestrator;
pub mod output;
pub mod scenario;
pub mod solution;
pub mod solver;
pub mod stat;
