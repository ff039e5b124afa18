//! Path optimization for car-like vehicles
//!
//! A noisy reference polyline is smoothed and segmented, the free lateral
//! corridor of the vehicle footprint is extracted per station from an
//! occupancy map, and a curvature-bounded path is optimized inside it.

pub mod collision;
pub mod config;
pub mod optimizer;
pub mod reference_path;
pub mod search_seeder;
pub mod spline;
pub mod trajectory;

pub use collision::{CollisionChecker, CorridorBound, CorridorSample, StationCorridor};
pub use config::{Config, ConfigUpdate, CostWeights, CoveringCircles, OptimizationMethod, SmoothingConfig, SolverSettings};
pub use optimizer::{PathOptimizer, Solution, SolveArtifacts, SolveStatus};
pub use reference_path::{ReferencePath, ReferencePathProcessor, Station};
pub use search_seeder::{SearchResult, SearchSeeder, SearchSeederConfig};
