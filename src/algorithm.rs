mod bfs;
mod pibt;

pub use bfs::{DistanceOracle, DistanceTable, UNREACHABLE};
pub(crate) use pibt::{ResolveError, Resolver};
