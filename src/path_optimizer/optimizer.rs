//! Top-level path optimizer
//!
//! Runs the full pipeline for one planning request: reference processing,
//! corridor extraction, trajectory optimization and output resampling.

use std::time::Instant;

use log::{debug, info, warn};

use super::collision::{CollisionChecker, CorridorSample};
use super::config::{Config, ConfigUpdate};
use super::reference_path::{ReferencePath, ReferencePathProcessor};
use super::search_seeder::SearchSeeder;
use super::trajectory::{resample, resolve_bounds, TrajectoryOptimizer};
use crate::common::{OccupancyMap, OptimizerError, OptimizerResult, Point2D, State, VehicleState};

/// How a returned path was obtained
#[derive(Debug, Clone, PartialEq)]
pub enum SolveStatus {
    /// All hard constraints hold on the returned path
    Optimal,
    /// Optimization failed and the smoothed reference is returned instead
    Degraded { cause: OptimizerError },
}

/// Inspection data produced along the way
#[derive(Debug, Clone, Default)]
pub struct SolveArtifacts {
    pub rear_bounds: Vec<CorridorSample>,
    pub center_bounds: Vec<CorridorSample>,
    pub front_bounds: Vec<CorridorSample>,
    pub smoothed_path: Vec<State>,
    /// Cells of the search seeder path, empty unless the seeder ran
    pub search_display: Vec<Point2D>,
}

/// Result of a solve
#[derive(Debug, Clone)]
pub struct Solution {
    pub path: Vec<State>,
    pub status: SolveStatus,
    pub artifacts: SolveArtifacts,
}

impl Solution {
    pub fn is_optimal(&self) -> bool {
        self.status == SolveStatus::Optimal
    }
}

/// Path optimizer bound to one start/end pair and one map
pub struct PathOptimizer<'a, M: OccupancyMap> {
    config: Config,
    vehicle: VehicleState,
    map: &'a M,
}

impl<'a, M: OccupancyMap> PathOptimizer<'a, M> {
    pub fn new(start: State, end: State, map: &'a M) -> Self {
        Self::with_config(start, end, map, Config::default())
    }

    pub fn with_config(start: State, end: State, map: &'a M, config: Config) -> Self {
        Self { config, vehicle: VehicleState::new(start, end), map }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vehicle_state(&self) -> &VehicleState {
        &self.vehicle
    }

    /// Apply one configuration change. Rejected changes leave the configuration untouched.
    pub fn set_config(&mut self, update: ConfigUpdate) -> OptimizerResult<()> {
        let mut next = self.config.clone();
        match next.apply(update) {
            Ok(()) => {
                self.config = next;
                info!("config updated: {:?}", update);
                Ok(())
            }
            Err(e) => {
                warn!("config update {:?} rejected: {}", update, e);
                Err(e)
            }
        }
    }

    /// Apply a change given as parameter name and textual value
    pub fn set_config_by_name(&mut self, name: &str, value: &str) -> OptimizerResult<()> {
        match ConfigUpdate::parse(name, value) {
            Ok(update) => self.set_config(update),
            Err(e) => {
                warn!("{}", e);
                Err(e)
            }
        }
    }

    /// Smooth the reference points, then optimize within the extracted corridors
    pub fn solve(&self, reference_points: &[State]) -> OptimizerResult<Solution> {
        self.run(reference_points, true)
    }

    /// Optimize directly over the reference points, which must already be dense
    pub fn solve_without_smoothing(&self, reference_points: &[State]) -> OptimizerResult<Solution> {
        self.run(reference_points, false)
    }

    fn run(&self, reference_points: &[State], smoothing: bool) -> OptimizerResult<Solution> {
        let config = &self.config;
        if !self.vehicle.start.is_finite() || !self.vehicle.end.is_finite() {
            let e = OptimizerError::DegenerateGeometry("start or end state is not finite".to_string());
            warn!("solve failed: {}", e);
            return Err(e);
        }

        let timer = Instant::now();
        let mut artifacts = SolveArtifacts::default();
        let reference = match self.build_reference(reference_points, smoothing, &mut artifacts) {
            Ok(reference) => reference,
            Err(e) => {
                warn!("reference path rejected: {}", e);
                return Err(e);
            }
        };
        artifacts.smoothed_path = reference.samples().to_vec();
        self.log_stage(
            &format!(
                "reference path: {} stations over {:.2} m",
                reference.stations().len(),
                reference.length()
            ),
            timer,
        );

        match self.optimize(&reference, &mut artifacts, timer) {
            Ok(path) => {
                self.log_stage(&format!("solve succeeded with {} states", path.len()), timer);
                Ok(Solution { path, status: SolveStatus::Optimal, artifacts })
            }
            Err(cause) if config.raw_result => {
                warn!("optimization failed, returning the smoothed path: {}", cause);
                Ok(Solution {
                    path: artifacts.smoothed_path.clone(),
                    status: SolveStatus::Degraded { cause },
                    artifacts,
                })
            }
            Err(e) => {
                warn!("optimization failed: {}", e);
                Err(e)
            }
        }
    }

    fn build_reference(
        &self,
        reference_points: &[State],
        smoothing: bool,
        artifacts: &mut SolveArtifacts,
    ) -> OptimizerResult<ReferencePath> {
        let processor = ReferencePathProcessor::new(&self.config);
        let primary = if smoothing {
            processor.process(reference_points, &self.vehicle)
        } else {
            ReferencePath::from_raw_points(reference_points, &self.config)
        };
        match primary {
            Err(e) if e.is_reference_rejection() && self.config.use_search_fallback => {
                warn!("{}, seeding the reference with a grid search", e);
                let seed = SearchSeeder::new(self.map, &self.config).plan(&self.vehicle.start, &self.vehicle.end)?;
                artifacts.search_display = seed.cells;
                processor.process(&seed.path, &self.vehicle)
            }
            other => other,
        }
    }

    fn optimize(&self, reference: &ReferencePath, artifacts: &mut SolveArtifacts, timer: Instant) -> OptimizerResult<Vec<State>> {
        let config = &self.config;
        let stations = reference.stations();
        let checker = CollisionChecker::new(self.map, config);

        let corridors: Vec<_> = stations.iter().map(|st| checker.station_corridor(&st.state)).collect();
        for (st, corridor) in stations.iter().zip(corridors.iter()) {
            artifacts.rear_bounds.push(checker.sample(&st.state, 0, corridor.rear));
            artifacts.center_bounds.push(checker.sample(&st.state, 1, corridor.center));
            artifacts.front_bounds.push(checker.sample(&st.state, 2, corridor.front));
        }
        self.log_stage("corridor extraction done", timer);

        let bounds = resolve_bounds(&corridors)?;
        let p = checker.positions();
        let offsets = [p[0].offset, p[1].offset, p[2].offset];
        let states = TrajectoryOptimizer::new(config).optimize(stations, &bounds, offsets, &self.vehicle)?;
        self.log_stage(&format!("{} optimization done", config.optimization_method), timer);

        if config.raw_result {
            Ok(states)
        } else {
            Ok(resample(&states, config.output_interval))
        }
    }

    fn log_stage(&self, message: &str, timer: Instant) {
        let elapsed = timer.elapsed().as_secs_f64() * 1000.0;
        if self.config.info_output {
            info!("{} ({:.2} ms)", message, elapsed);
        } else {
            debug!("{} ({:.2} ms)", message, elapsed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_optimizer::config::OptimizationMethod;
    use crate::utils::GridMap;
    use approx::assert_relative_eq;

    fn open_map() -> GridMap {
        GridMap::new(80, 40, 0.5, Point2D::new(-10.0, -10.0)).unwrap()
    }

    fn straight_reference() -> Vec<State> {
        (0..=10).map(|i| State::new(i as f64, 0.0, 0.0)).collect()
    }

    #[test]
    fn test_set_config_rejects_without_change() {
        let map = open_map();
        let mut optimizer = PathOptimizer::new(State::new(0.0, 0.0, 0.0), State::new(10.0, 0.0, 0.0), &map);
        assert!(optimizer.set_config(ConfigUpdate::CarLength(-2.0)).is_err());
        assert_relative_eq!(optimizer.config().car_length(), 4.9);

        optimizer.set_config_by_name("optimization_method_", "qp").unwrap();
        assert_eq!(optimizer.config().optimization_method, OptimizationMethod::Qp);
        assert!(matches!(
            optimizer.set_config_by_name("optimization_method_", "3"),
            Err(OptimizerError::InvalidConfig(_))
        ));
        assert_eq!(optimizer.config().optimization_method, OptimizationMethod::Qp);
        assert!(optimizer.set_config_by_name("unknown_", "1").is_err());
    }

    #[test]
    fn test_solve_fills_artifacts() {
        let map = open_map();
        let optimizer = PathOptimizer::new(State::new(0.0, 0.0, 0.0), State::new(10.0, 0.0, 0.0), &map);
        let solution = optimizer.solve(&straight_reference()).unwrap();
        assert!(solution.is_optimal());
        let stations = solution.artifacts.center_bounds.len();
        assert!(stations > 2);
        assert_eq!(solution.artifacts.rear_bounds.len(), stations);
        assert_eq!(solution.artifacts.front_bounds.len(), stations);
        assert!(!solution.artifacts.smoothed_path.is_empty());
        assert!(solution.artifacts.search_display.is_empty());
    }

    #[test]
    fn test_non_finite_start_rejected() {
        let map = open_map();
        let optimizer = PathOptimizer::new(State::new(f64::NAN, 0.0, 0.0), State::new(10.0, 0.0, 0.0), &map);
        assert!(matches!(
            optimizer.solve(&straight_reference()),
            Err(OptimizerError::DegenerateGeometry(_))
        ));
    }

    #[test]
    fn test_search_fallback_replaces_rejected_reference() {
        let map = open_map();
        let mut optimizer = PathOptimizer::new(State::new(0.0, 0.0, 0.0), State::new(10.0, 0.0, 0.0), &map);
        let single = vec![State::new(0.0, 0.0, 0.0)];
        assert!(matches!(
            optimizer.solve(&single),
            Err(OptimizerError::InsufficientInput { usable: 1 })
        ));

        optimizer.set_config(ConfigUpdate::UseSearchFallback(true)).unwrap();
        let solution = optimizer.solve(&single).unwrap();
        assert!(!solution.artifacts.search_display.is_empty());
        let last = solution.path.last().unwrap();
        assert!((last.x - 10.0).abs() < 0.1 && last.y.abs() < 0.1);
    }
}
