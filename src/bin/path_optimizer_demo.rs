// Path optimizer demo
//
// Smooths a noisy reference that extends past the start and the goal through
// a map with two obstacles, optimizes a collision-free path and saves a plot
// to img/path_optimizer/.
//
// Config overrides can be given as arguments: `raw_result=true info_output_=1`
use std::process;

use itertools::Itertools;
use log::{error, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use path_optimizer::utils::{colors, PathStyle, PointStyle, Visualizer};
use path_optimizer::{GridMap, PathOptimizer, Point2D, SolveStatus, State};

fn build_map() -> GridMap {
    let mut map = match GridMap::new(240, 100, 0.25, Point2D::new(-5.0, -12.5)) {
        Ok(map) => map,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    map.fill_rect(Point2D::new(12.0, -12.5), Point2D::new(16.0, -2.0));
    map.fill_rect(Point2D::new(30.0, 2.5), Point2D::new(34.0, 12.5));
    map
}

fn noisy_reference(sigma: f64) -> Result<Vec<State>, rand_distr::NormalError> {
    let mut rng = StdRng::seed_from_u64(7);
    let noise = Normal::new(0.0, sigma)?;
    Ok((-1..=26)
        .map(|i| {
            let x = i as f64 * 2.0;
            let y = 1.5 * (x / 50.0 * std::f64::consts::PI).sin() + noise.sample(&mut rng);
            State::new(x, y, 0.0)
        })
        .collect())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let map = build_map();
    let reference = match noisy_reference(0.15) {
        Ok(reference) => reference,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    let start = State::new(0.0, 0.0, 0.0);
    let end = State::new(50.0, 0.0, 0.0);

    let mut optimizer = PathOptimizer::new(start, end, &map);
    for arg in std::env::args().skip(1) {
        match arg.splitn(2, '=').collect_tuple() {
            Some((name, value)) => {
                if optimizer.set_config_by_name(name, value).is_err() {
                    process::exit(2);
                }
            }
            None => {
                error!("expected name=value, got '{}'", arg);
                process::exit(2);
            }
        }
    }

    let solution = match optimizer.solve(&reference) {
        Ok(solution) => solution,
        Err(e) => {
            error!("solve failed: {}", e);
            process::exit(1);
        }
    };
    match &solution.status {
        SolveStatus::Optimal => info!("optimized path with {} states", solution.path.len()),
        SolveStatus::Degraded { cause } => info!("degraded result ({}), returning the smoothed path", cause),
    }

    let max_turn = solution
        .path
        .iter()
        .tuple_windows()
        .filter(|(a, b)| a.distance(b) > 1e-9)
        .map(|(a, b)| path_optimizer::common::angle_diff(b.heading, a.heading).abs() / a.distance(b))
        .fold(0.0, f64::max);
    info!(
        "max heading change per meter {:.4}, limit {:.4}",
        max_turn,
        optimizer.config().max_curvature()
    );

    let reference_points: Vec<Point2D> = reference.iter().map(|s| s.position()).collect();
    let mut vis = Visualizer::new();
    vis.set_title("Path Optimizer");
    vis.plot_grid_map(&map)
        .plot_points(&reference_points, &PointStyle::new(colors::REFERENCE, "Reference").with_symbol('x'))
        .plot_states(&solution.artifacts.smoothed_path, &PathStyle::new(colors::SMOOTHED, "Smoothed"))
        .plot_corridor(&solution.artifacts.center_bounds, "Center corridor")
        .plot_states(&solution.path, &PathStyle::default())
        .plot_start(&start)
        .plot_goal(&end);

    if let Err(e) = std::fs::create_dir_all("img/path_optimizer") {
        error!("cannot create output directory: {}", e);
        process::exit(1);
    }
    let output_path = "img/path_optimizer/path_optimizer.png";
    match vis.save_png(output_path, 1200, 600) {
        Ok(()) => info!("plot saved to {}", output_path),
        Err(e) => error!("plot failed: {}", e),
    }
}
