//! path_optimizer - path smoothing and corridor-constrained optimization for car-like vehicles
//!
//! This crate turns a rough reference path over an occupancy grid into a
//! smooth, collision-free path that respects the vehicle's steering limit.

// Core modules
pub mod common;
pub mod utils;

// Algorithm modules
pub mod path_optimizer;

// Re-export common types for convenience
pub use common::{OccupancyMap, MapExtent, Point2D, State, VehicleState};
pub use common::{OptimizerError, OptimizerResult};
pub use path_optimizer::{Config, ConfigUpdate, OptimizationMethod, PathOptimizer, Solution, SolveStatus};
pub use utils::GridMap;
