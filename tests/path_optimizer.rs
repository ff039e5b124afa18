use approx::assert_relative_eq;
use itertools::Itertools;

use path_optimizer::common::{angle_diff, path_length};
use path_optimizer::path_optimizer::CorridorBound;
use path_optimizer::{
    Config, ConfigUpdate, GridMap, OptimizationMethod, OptimizerError, PathOptimizer, Point2D, SolveStatus, State,
};

fn open_map() -> GridMap {
    GridMap::new(200, 80, 0.25, Point2D::new(-10.0, -10.0)).unwrap()
}

fn straight_reference(length: f64, spacing: f64) -> Vec<State> {
    let n = (length / spacing).round() as usize;
    (0..=n).map(|i| State::new(i as f64 * spacing, 0.0, 0.0)).collect()
}

fn assert_curvature_bounded(path: &[State], max_curvature: f64) {
    for (a, b) in path.iter().tuple_windows() {
        let turn = angle_diff(b.heading, a.heading).abs();
        assert!(
            turn <= max_curvature * a.distance(b) + 1e-6,
            "heading change {} over {} m",
            turn,
            a.distance(b)
        );
    }
}

#[test]
fn test_free_map_straight_path() {
    let map = open_map();
    let start = State::new(0.0, 0.0, 0.0);
    let end = State::new(10.0, 0.0, 0.0);
    let optimizer = PathOptimizer::new(start, end, &map);

    let solution = optimizer.solve(&straight_reference(10.0, 1.0)).unwrap();
    assert_eq!(solution.status, SolveStatus::Optimal);

    let first = solution.path.first().unwrap();
    let last = solution.path.last().unwrap();
    assert_relative_eq!(first.x, start.x, epsilon = 1e-6);
    assert_relative_eq!(first.y, start.y, epsilon = 1e-6);
    assert_relative_eq!(first.heading, start.heading, epsilon = 1e-6);
    assert_relative_eq!(last.x, end.x, epsilon = 1e-3);
    assert_relative_eq!(last.y, end.y, epsilon = 1e-3);
    assert_relative_eq!(last.heading, end.heading, epsilon = 1e-6);
    assert!(path_length(&solution.path) >= 10.0 - 1e-6);

    // resampled at the output interval
    let spacing = solution.path[0].distance(&solution.path[1]);
    assert_relative_eq!(spacing, optimizer.config().output_interval, epsilon = 1e-3);
}

#[test]
fn test_wall_across_corridor_is_infeasible() {
    let mut map = open_map();
    map.fill_rect(Point2D::new(4.5, -10.0), Point2D::new(5.5, 10.0));
    let start = State::new(0.0, 0.0, 0.0);
    let end = State::new(10.0, 0.0, 0.0);
    let reference = straight_reference(10.0, 1.0);

    let mut optimizer = PathOptimizer::new(start, end, &map);
    assert!(matches!(optimizer.solve(&reference), Err(OptimizerError::Infeasible(_))));

    optimizer.set_config(ConfigUpdate::RawResult(true)).unwrap();
    let solution = optimizer.solve(&reference).unwrap();
    assert!(matches!(
        solution.status,
        SolveStatus::Degraded { cause: OptimizerError::Infeasible(_) }
    ));
    assert!(!solution.is_optimal());
    assert_eq!(solution.path, solution.artifacts.smoothed_path);
    assert_relative_eq!(solution.path[0].x, 0.0, epsilon = 1e-6);
    assert!(solution
        .artifacts
        .center_bounds
        .iter()
        .any(|s| s.bound == CorridorBound::Blocked));
}

#[test]
fn test_set_config_car_length_recomputes_circles() {
    let map = open_map();
    let mut optimizer = PathOptimizer::new(State::new(0.0, 0.0, 0.0), State::new(10.0, 0.0, 0.0), &map);
    let width = optimizer.config().car_width();
    let wheel_base = optimizer.config().wheel_base();

    optimizer.set_config_by_name("car_length_", "6.0").unwrap();
    let config = optimizer.config();
    assert_relative_eq!(config.car_length(), 6.0);
    assert_relative_eq!(
        config.circle_radius(),
        ((6.0_f64 / 8.0).powi(2) + (width / 2.0).powi(2)).sqrt(),
        epsilon = 1e-12
    );
    let d = config.circle_offsets();
    assert_relative_eq!(d[0], -2.25, epsilon = 1e-12);
    assert_relative_eq!(d[1], -0.75, epsilon = 1e-12);
    assert_relative_eq!(d[2], 0.75, epsilon = 1e-12);
    assert_relative_eq!(d[3], 2.25, epsilon = 1e-12);
    assert_relative_eq!(config.car_width(), width);
    assert_relative_eq!(config.wheel_base(), wheel_base);
}

#[test]
fn test_unsupported_optimization_method_rejected() {
    let map = open_map();
    let mut optimizer = PathOptimizer::new(State::new(0.0, 0.0, 0.0), State::new(10.0, 0.0, 0.0), &map);
    let before = optimizer.config().optimization_method;
    assert!(matches!(
        optimizer.set_config_by_name("optimization_method_", "4"),
        Err(OptimizerError::InvalidConfig(_))
    ));
    assert!(matches!(
        optimizer.set_config_by_name("optimization_method_", "ipopt"),
        Err(OptimizerError::InvalidConfig(_))
    ));
    assert_eq!(optimizer.config().optimization_method, before);
}

#[test]
fn test_two_point_and_one_point_references() {
    let map = open_map();
    let mut optimizer = PathOptimizer::new(State::new(0.0, 0.0, 0.0), State::new(10.0, 0.0, 0.0), &map);
    optimizer.set_config(ConfigUpdate::ModifyInputPoints(false)).unwrap();

    let two = vec![State::new(0.0, 0.0, 0.0), State::new(10.0, 0.0, 0.0)];
    assert!(optimizer.solve(&two).is_ok());

    let one = vec![State::new(0.0, 0.0, 0.0)];
    assert_eq!(
        optimizer.solve(&one).unwrap_err(),
        OptimizerError::InsufficientInput { usable: 1 }
    );
}

#[test]
fn test_solve_is_idempotent() {
    let mut map = open_map();
    map.fill_rect(Point2D::new(12.0, -10.0), Point2D::new(14.0, -1.0));
    let optimizer = PathOptimizer::new(State::new(0.0, 0.0, 0.0), State::new(30.0, 0.0, 0.0), &map);
    let reference = straight_reference(30.0, 1.0);

    let first = optimizer.solve(&reference).unwrap();
    let second = optimizer.solve(&reference).unwrap();
    assert_eq!(first.path, second.path);
    assert_eq!(first.artifacts.center_bounds, second.artifacts.center_bounds);
}

#[test]
fn test_obstacle_detour_respects_curvature_and_corridor() {
    let mut map = open_map();
    map.fill_rect(Point2D::new(12.0, -10.0), Point2D::new(14.0, -1.0));
    let start = State::new(0.0, 0.0, 0.0);
    let end = State::new(30.0, 0.0, 0.0);
    let reference = straight_reference(30.0, 1.0);

    for &method in &[OptimizationMethod::Sqp, OptimizationMethod::Qp] {
        let mut optimizer = PathOptimizer::new(start, end, &map);
        optimizer.set_config(ConfigUpdate::OptimizationMethod(method)).unwrap();
        let max_k = optimizer.config().max_curvature();

        let resampled = optimizer.solve(&reference).unwrap();
        assert!(resampled.is_optimal());
        assert_curvature_bounded(&resampled.path, max_k);

        optimizer.set_config(ConfigUpdate::RawResult(true)).unwrap();
        let raw = optimizer.solve(&reference).unwrap();
        assert!(raw.is_optimal());
        assert_curvature_bounded(&raw.path, max_k);

        let config: &Config = optimizer.config();
        let d = config.circle_offsets();
        let r = config.rear_axle_to_center();
        let offsets = [r + d[0], r, r + d[3]];
        let artifacts = &raw.artifacts;
        assert_eq!(artifacts.center_bounds.len(), raw.path.len());

        // the center circle has to leave the reference to pass the block
        assert!(raw.path.iter().any(|s| s.y > 0.3));
        for (i, state) in raw.path.iter().enumerate().skip(1) {
            let samples = [artifacts.rear_bounds[i], artifacts.center_bounds[i], artifacts.front_bounds[i]];
            for (sample, &a) in samples.iter().zip(offsets.iter()) {
                let circle = state.offset(a, 0.0);
                let lateral = (circle.to_vector() - sample.base.position().to_vector()).dot(&sample.base.normal());
                if let CorridorBound::Free { left, right } = sample.bound {
                    assert!(
                        lateral >= right - 1e-3 && lateral <= left + 1e-3,
                        "station {} circle at {} outside [{}, {}]",
                        i,
                        lateral,
                        right,
                        left
                    );
                }
            }
        }
    }
}

#[test]
fn test_solve_without_smoothing() {
    let map = open_map();
    let start = State::new(0.0, 0.0, 0.0);
    let end = State::new(10.0, 0.0, 0.0);
    let optimizer = PathOptimizer::new(start, end, &map);

    let solution = optimizer.solve_without_smoothing(&straight_reference(10.0, 0.5)).unwrap();
    assert!(solution.is_optimal());
    assert_eq!(solution.artifacts.center_bounds.len(), 21);
    assert_relative_eq!(solution.path[0].x, 0.0, epsilon = 1e-9);
    assert_relative_eq!(solution.path.last().unwrap().x, 10.0, epsilon = 1e-3);
    assert_curvature_bounded(&solution.path, optimizer.config().max_curvature());
}

#[test]
fn test_reference_starting_ahead_of_start_rejected() {
    let map = open_map();
    let start = State::new(0.0, 0.0, 0.5);
    let end = State::new(15.0, 0.0, 0.0);
    let reference: Vec<State> = (1..=15).map(|i| State::new(i as f64, 0.0, 0.0)).collect();

    let mut optimizer = PathOptimizer::new(start, end, &map);
    assert!(matches!(optimizer.solve(&reference), Err(OptimizerError::DegenerateGeometry(_))));
    assert!(matches!(
        optimizer.solve_without_smoothing(&reference),
        Err(OptimizerError::DegenerateGeometry(_))
    ));

    optimizer.set_config(ConfigUpdate::RawResult(true)).unwrap();
    let solution = optimizer.solve(&reference).unwrap();
    assert!(matches!(
        solution.status,
        SolveStatus::Degraded { cause: OptimizerError::DegenerateGeometry(_) }
    ));
}

#[test]
fn test_exact_end_position() {
    let map = open_map();
    let start = State::new(0.0, 0.0, 0.0);
    let end = State::new(20.0, 1.0, 0.0);
    let reference = straight_reference(20.0, 1.0);

    let mut optimizer = PathOptimizer::new(start, end, &map);
    optimizer.set_config_by_name("exact_end_position_", "true").unwrap();
    let solution = optimizer.solve(&reference).unwrap();
    assert!(solution.is_optimal());
    let last = solution.path.last().unwrap();
    assert_relative_eq!(last.x, 20.0, epsilon = 1e-6);
    assert_relative_eq!(last.y, 1.0, epsilon = 1e-6);
    assert_relative_eq!(last.heading, 0.0, epsilon = 1e-6);
    assert_curvature_bounded(&solution.path, optimizer.config().max_curvature());

    // past the end of the reference the end pose cannot be pinned
    let far = State::new(23.0, 1.0, 0.0);
    let optimizer = PathOptimizer::with_config(start, far, &map, optimizer.config().clone());
    assert!(matches!(optimizer.solve(&reference), Err(OptimizerError::DegenerateGeometry(_))));
}

#[test]
fn test_soft_end_heading() {
    let map = open_map();
    let start = State::new(0.0, 0.0, 0.0);
    let end = State::new(2.0, 0.0, 1.5);
    let reference = straight_reference(2.0, 0.5);

    let mut optimizer = PathOptimizer::new(start, end, &map);
    assert!(matches!(optimizer.solve(&reference), Err(OptimizerError::Infeasible(_))));

    optimizer.set_config_by_name("constraint_end_heading_", "false").unwrap();
    let solution = optimizer.solve(&reference).unwrap();
    assert_eq!(solution.status, SolveStatus::Optimal);
    let last = solution.path.last().unwrap();
    assert!(last.heading > 0.1 && last.heading < 1.5, "end heading {}", last.heading);
    assert_curvature_bounded(&solution.path, optimizer.config().max_curvature());
}
