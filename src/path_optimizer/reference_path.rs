//! Reference path processing
//!
//! Turns a raw, possibly noisy reference polyline into a smooth curve and
//! splits it into fixed arc-length stations for corridor search and
//! optimization.

use itertools::Itertools;
use log::debug;
use nalgebra as na;
use std::f64::consts::FRAC_PI_2;

use super::config::Config;
use super::spline::Spline2D;
use crate::common::{angle_diff, OptimizerError, OptimizerResult, Point2D, State, VehicleState};

/// Points closer than this are treated as coincident
const COINCIDENT_EPS: f64 = 1e-6;
/// A trailing segment shorter than this fraction of the spacing is merged
const MIN_TAIL_RATIO: f64 = 0.3;
/// Golden-section steps when projecting a state onto the curve
const PROJECTION_ITERATIONS: usize = 60;

/// Segmentation breakpoint on the reference path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Station {
    /// Arc length from the first station [m]
    pub s: f64,
    /// Reference pose at the station
    pub state: State,
    /// Arc length to the next station, zero for the last one [m]
    pub ds: f64,
    /// Mean reference curvature over the segment to the next station [1/m]
    pub kappa: f64,
}

/// Smoothed reference curve and its segmentation
#[derive(Debug, Clone)]
pub struct ReferencePath {
    samples: Vec<State>,
    stations: Vec<Station>,
}

impl ReferencePath {
    /// Build stations from poses, deriving spacing and segment curvature
    fn from_poses(poses: Vec<State>, samples: Vec<State>) -> OptimizerResult<Self> {
        if poses.len() < 2 {
            return Err(OptimizerError::InsufficientInput { usable: poses.len() });
        }
        let mut stations = Vec::with_capacity(poses.len());
        let mut s = 0.0;
        for (i, pose) in poses.iter().enumerate() {
            let (ds, kappa) = match poses.get(i + 1) {
                Some(next) => {
                    let ds = pose.distance(next);
                    if ds < COINCIDENT_EPS {
                        return Err(OptimizerError::DegenerateGeometry(format!(
                            "stations {} and {} coincide",
                            i,
                            i + 1
                        )));
                    }
                    (ds, angle_diff(next.heading, pose.heading) / ds)
                }
                None => (0.0, 0.0),
            };
            stations.push(Station { s, state: *pose, ds, kappa });
            s += ds;
        }
        Ok(Self { samples, stations })
    }

    /// Use already dense reference points directly as stations, without smoothing.
    ///
    /// Headings are recomputed from the point geometry by central differences.
    pub fn from_raw_points(points: &[State], config: &Config) -> OptimizerResult<Self> {
        let processor = ReferencePathProcessor::new(config);
        let pts = processor.prepare(points)?;
        let n = pts.len();
        let poses: Vec<State> = (0..n)
            .map(|i| {
                let prev = pts[i.saturating_sub(1)];
                let next = pts[(i + 1).min(n - 1)];
                let heading = (next.y - prev.y).atan2(next.x - prev.x);
                State::new(pts[i].x, pts[i].y, heading)
            })
            .collect();
        let samples = poses.clone();
        Self::from_poses(poses, samples)
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Dense samples of the smoothed curve between the start and end projections
    pub fn samples(&self) -> &[State] {
        &self.samples
    }

    /// Arc length covered by the stations
    pub fn length(&self) -> f64 {
        self.stations.last().map(|s| s.s).unwrap_or(0.0)
    }
}

/// Smoothing and segmentation of raw reference points
pub struct ReferencePathProcessor<'c> {
    config: &'c Config,
}

impl<'c> ReferencePathProcessor<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self { config }
    }

    /// Drop near-duplicate points and points that reverse the running direction by more than 90 degrees
    pub fn filter_points(&self, points: &[Point2D]) -> Vec<Point2D> {
        let tol = self.config.smoothing.min_point_spacing;
        let mut kept: Vec<Point2D> = Vec::with_capacity(points.len());
        for &p in points {
            if let Some(last) = kept.last() {
                if p.distance(last) < tol {
                    continue;
                }
                if kept.len() >= 2 {
                    let prev = kept[kept.len() - 2];
                    let running = (last.y - prev.y).atan2(last.x - prev.x);
                    let candidate = (p.y - last.y).atan2(p.x - last.x);
                    if angle_diff(candidate, running).abs() > FRAC_PI_2 {
                        continue;
                    }
                }
            }
            kept.push(p);
        }
        kept
    }

    /// Validate raw points, applying the input filter when enabled
    pub fn prepare(&self, points: &[State]) -> OptimizerResult<Vec<Point2D>> {
        if let Some(i) = points.iter().position(|p| !p.position().is_finite()) {
            return Err(OptimizerError::DegenerateGeometry(format!(
                "reference point {} is not finite",
                i
            )));
        }
        let positions: Vec<Point2D> = points.iter().map(|p| p.position()).collect();
        let pts = if self.config.modify_input_points {
            self.filter_points(&positions)
        } else {
            positions
        };
        if pts.len() < 2 {
            return Err(OptimizerError::InsufficientInput { usable: pts.len() });
        }
        if let Some(i) = pts.iter().tuple_windows().position(|(a, b)| a.distance(b) < COINCIDENT_EPS) {
            return Err(OptimizerError::DegenerateGeometry(format!(
                "reference points {} and {} coincide",
                i,
                i + 1
            )));
        }
        Ok(pts)
    }

    /// Resample the raw polyline densely along an interpolating spline
    pub fn densify(&self, points: &[Point2D]) -> OptimizerResult<Vec<Point2D>> {
        let xs: Vec<f64> = points.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
        let spline = Spline2D::new(&xs, &ys)?;
        let s_end = spline.s_end();
        let n = ((s_end / self.config.smoothing.sample_spacing).ceil() as usize).max(1);
        Ok((0..=n)
            .map(|i| {
                let (x, y) = spline.calc_position(s_end * i as f64 / n as f64);
                Point2D::new(x, y)
            })
            .collect())
    }

    /// Least-squares smoothing with pinned end points.
    ///
    /// Minimizes `w_dev * sum |p - q|^2 + w_smooth * sum |p[i-1] - 2p[i] + p[i+1]|^2`.
    pub fn smooth(&self, samples: &[Point2D]) -> OptimizerResult<Vec<Point2D>> {
        let n = samples.len();
        if n <= 2 {
            return Ok(samples.to_vec());
        }
        let w_dev = self.config.smoothing.weight_deviation;
        let w_smooth = self.config.smoothing.weight_smoothness;

        let mut h = na::DMatrix::<f64>::zeros(n, n);
        for i in 1..n - 1 {
            let idx = [i - 1, i, i + 1];
            let coef = [1.0, -2.0, 1.0];
            for r in 0..3 {
                for c in 0..3 {
                    h[(idx[r], idx[c])] += w_smooth * coef[r] * coef[c];
                }
            }
            h[(i, i)] += w_dev;
        }
        let mut rhs = na::DMatrix::<f64>::zeros(n, 2);
        for i in 1..n - 1 {
            rhs[(i, 0)] = w_dev * samples[i].x;
            rhs[(i, 1)] = w_dev * samples[i].y;
        }
        for &pin in &[0, n - 1] {
            for i in 1..n - 1 {
                rhs[(i, 0)] -= h[(i, pin)] * samples[pin].x;
                rhs[(i, 1)] -= h[(i, pin)] * samples[pin].y;
            }
            h.row_mut(pin).fill(0.0);
            h.column_mut(pin).fill(0.0);
            h[(pin, pin)] = 1.0;
            rhs[(pin, 0)] = samples[pin].x;
            rhs[(pin, 1)] = samples[pin].y;
        }

        let chol = h
            .cholesky()
            .ok_or_else(|| OptimizerError::Numerical("smoothing system is not positive definite".to_string()))?;
        let sol = chol.solve(&rhs);
        Ok((0..n).map(|i| Point2D::new(sol[(i, 0)], sol[(i, 1)])).collect())
    }

    /// Smooth and segment raw reference points between the start and end states
    pub fn process(&self, points: &[State], vehicle: &VehicleState) -> OptimizerResult<ReferencePath> {
        let pts = self.prepare(points)?;
        let dense = self.densify(&pts)?;
        let smoothed = self.smooth(&dense)?;
        let xs: Vec<f64> = smoothed.iter().map(|p| p.x).collect();
        let ys: Vec<f64> = smoothed.iter().map(|p| p.y).collect();
        let spline = Spline2D::new(&xs, &ys)?;

        let s_start = project(&spline, vehicle.start.position());
        let s_end = project(&spline, vehicle.end.position());
        let seg = self.config.segment_length;
        if s_end - s_start < COINCIDENT_EPS.max(0.1 * seg) {
            return Err(OptimizerError::DegenerateGeometry(format!(
                "end state projects at s={:.3}, not beyond start at s={:.3}",
                s_end, s_start
            )));
        }

        let station_s = segment_breakpoints(s_start, s_end, seg);
        let poses: Vec<State> = station_s.iter().map(|&s| pose_at(&spline, s)).collect();

        let out = self.config.output_interval;
        let n_out = (((s_end - s_start) / out).ceil() as usize).max(1);
        let samples: Vec<State> = (0..=n_out)
            .map(|i| pose_at(&spline, s_start + (s_end - s_start) * i as f64 / n_out as f64))
            .collect();

        debug!(
            "reference path: {} input points, {} smoothed samples, {} stations over {:.2} m",
            points.len(),
            smoothed.len(),
            poses.len(),
            s_end - s_start
        );
        ReferencePath::from_poses(poses, samples)
    }
}

fn pose_at(spline: &Spline2D, s: f64) -> State {
    let (x, y) = spline.calc_position(s);
    State::new(x, y, spline.calc_yaw(s)).with_curvature(spline.calc_curvature(s))
}

/// Arc length of the curve point closest to `p`
fn project(spline: &Spline2D, p: Point2D) -> f64 {
    let s_max = spline.s_end();
    let dist = |s: f64| {
        let (x, y) = spline.calc_position(s);
        (x - p.x).powi(2) + (y - p.y).powi(2)
    };

    let coarse = 0.1;
    let n = ((s_max / coarse).ceil() as usize).max(1);
    let step = s_max / n as f64;
    let best = (0..=n)
        .map(|i| i as f64 * step)
        .min_by(|a, b| dist(*a).partial_cmp(&dist(*b)).unwrap_or(std::cmp::Ordering::Equal))
        .unwrap_or(0.0);

    // Golden-section refinement around the coarse minimum
    let (mut lo, mut hi) = ((best - step).max(0.0), (best + step).min(s_max));
    let ratio = 0.5 * (5.0_f64.sqrt() - 1.0);
    for _ in 0..PROJECTION_ITERATIONS {
        let m1 = hi - ratio * (hi - lo);
        let m2 = lo + ratio * (hi - lo);
        if dist(m1) < dist(m2) {
            hi = m2;
        } else {
            lo = m1;
        }
    }
    0.5 * (lo + hi)
}

/// Station arc lengths from `s_start` to `s_end` with spacing `seg`.
///
/// The final segment is shorter than `seg` unless it would fall below
/// `MIN_TAIL_RATIO * seg`, in which case it is merged into the previous one.
fn segment_breakpoints(s_start: f64, s_end: f64, seg: f64) -> Vec<f64> {
    let length = s_end - s_start;
    let full = (length / seg).floor() as usize;
    let remainder = length - full as f64 * seg;
    let inner = if full == 0 {
        0
    } else if remainder > MIN_TAIL_RATIO * seg {
        full
    } else {
        full - 1
    };
    let mut s: Vec<f64> = (0..=inner).map(|i| s_start + i as f64 * seg).collect();
    s.push(s_end);
    s
}
