//! Constrained trajectory optimization in the Frenet frame of the reference
//!
//! Decision variables per station `i` are the lateral offset `e[i]` and the
//! heading error `psi[i]`; per segment the path curvature `k[i]`. Kinematics
//!
//! ```text
//! e[i+1]   = e[i]   + ds * (1 - kr*e[i]) * tan(psi[i])
//! psi[i+1] = psi[i] + ds * (k[i] * (1 - kr*e[i]) / cos(psi[i]) - kr)
//! ```
//!
//! are linearized around an iterate and solved as a sparse QP with OSQP. The
//! result is checked on the reconstructed Cartesian path; violated rows are
//! tightened and the problem is solved again.

use std::borrow::Cow;
use std::collections::BTreeMap;

use itertools::Itertools;
use log::debug;
use osqp::{CscMatrix, Problem, Settings, Status};

use super::collision::{CorridorBound, StationCorridor};
use super::config::{Config, OptimizationMethod, SolverSettings};
use super::reference_path::Station;
use crate::common::{angle_diff, normalize_angle, OptimizerError, OptimizerResult, State, VehicleState};

/// Share of the curvature limit handed to the QP
const CURVATURE_MARGIN: f64 = 0.98;
/// Share of the curvature limit accepted on the reconstructed path
const VERIFY_MARGIN: f64 = 0.99;
const TIGHTEN_FACTOR: f64 = 0.98;
const COLLISION_TOLERANCE: f64 = 1e-3;
/// Heading error is clamped to this for linearization [rad]
const MAX_LINEARIZATION_HEADING: f64 = 1.2;
/// Largest distance of a pinned boundary pose from its station normal [m]
const BOUNDARY_TOLERANCE: f64 = 1e-2;

const POSITION_NAMES: [&str; 3] = ["rear", "center", "front"];

/// Lateral bounds `(lower, upper)` of the rear, center and front circles at one station
pub type StationBounds = [(f64, f64); 3];

/// Turn per-station corridors into hard bounds.
///
/// Station 0 is the fixed start and is left unconstrained. A station outside
/// the map inherits the intersection of the nearest free corridors before and
/// after it; without both it is infeasible, as is any blocked station.
pub fn resolve_bounds(corridors: &[StationCorridor]) -> OptimizerResult<Vec<StationBounds>> {
    let n = corridors.len();
    let mut bounds = vec![[(f64::NEG_INFINITY, f64::INFINITY); 3]; n];
    for j in 0..3 {
        let bound_at = |i: usize| corridors[i].as_array()[j];
        for i in 1..n {
            let resolved = match bound_at(i) {
                CorridorBound::Blocked => {
                    return Err(OptimizerError::Infeasible(format!(
                        "station {} is blocked at the {} circle",
                        i, POSITION_NAMES[j]
                    )))
                }
                CorridorBound::OutOfMap => {
                    let before = (0..i).rev().map(bound_at).find(|b| b.is_free());
                    let after = (i + 1..n).map(bound_at).find(|b| b.is_free());
                    match (before, after) {
                        (Some(b), Some(a)) => b.intersect(&a),
                        _ => {
                            return Err(OptimizerError::Infeasible(format!(
                                "station {} leaves the map at the {} circle",
                                i, POSITION_NAMES[j]
                            )))
                        }
                    }
                }
                free => free,
            };
            bounds[i][j] = resolved.interval().ok_or_else(|| {
                OptimizerError::Infeasible(format!(
                    "contradictory bounds at station {} for the {} circle",
                    i, POSITION_NAMES[j]
                ))
            })?;
        }
    }
    Ok(bounds)
}

/// Frenet-frame trajectory: `e`, `psi` per station and `k` per segment
#[derive(Debug, Clone, PartialEq)]
pub struct FrenetTrajectory {
    pub e: Vec<f64>,
    pub psi: Vec<f64>,
    pub k: Vec<f64>,
}

impl FrenetTrajectory {
    fn zeros(n_stations: usize) -> Self {
        Self {
            e: vec![0.0; n_stations],
            psi: vec![0.0; n_stations],
            k: vec![0.0; n_stations.saturating_sub(1)],
        }
    }

    fn from_slice(x: &[f64], n_stations: usize) -> Self {
        Self {
            e: x[..n_stations].to_vec(),
            psi: x[n_stations..2 * n_stations].to_vec(),
            k: x[2 * n_stations..3 * n_stations - 1].to_vec(),
        }
    }

    fn max_lateral_change(&self, other: &FrenetTrajectory) -> f64 {
        self.e.iter().zip(other.e.iter()).fold(0.0, |acc, (a, b)| acc.max((a - b).abs()))
    }
}

/// Sparse QP `minimize 0.5 x'Px + q'x` subject to `l <= Ax <= u`.
///
/// Entries are keyed by `(column, row)` so they iterate in CSC order; only
/// the upper triangle of `P` is stored.
#[derive(Debug, Clone)]
struct QpProblem {
    n: usize,
    p: BTreeMap<(usize, usize), f64>,
    q: Vec<f64>,
    a: BTreeMap<(usize, usize), f64>,
    l: Vec<f64>,
    u: Vec<f64>,
}

impl QpProblem {
    /// Zero problem with `n` variables and `m` unbounded constraint rows
    fn new(n: usize, m: usize) -> Self {
        Self {
            n,
            p: BTreeMap::new(),
            q: vec![0.0; n],
            a: BTreeMap::new(),
            l: vec![f64::NEG_INFINITY; m],
            u: vec![f64::INFINITY; m],
        }
    }

    fn add_p(&mut self, i: usize, j: usize, value: f64) {
        let key = if i <= j { (j, i) } else { (i, j) };
        *self.p.entry(key).or_insert(0.0) += value;
    }

    fn set_a(&mut self, row: usize, col: usize, value: f64) {
        self.a.insert((col, row), value);
    }

    fn set_bounds(&mut self, row: usize, lower: f64, upper: f64) {
        self.l[row] = lower;
        self.u[row] = upper;
    }

    fn num_constraints(&self) -> usize {
        self.l.len()
    }

    fn add_square(&mut self, idx: usize, target: f64, weight: f64) {
        self.add_p(idx, idx, 2.0 * weight);
        self.q[idx] -= 2.0 * weight * target;
    }

    fn add_difference(&mut self, a: usize, b: usize, weight: f64) {
        self.add_p(a, a, 2.0 * weight);
        self.add_p(b, b, 2.0 * weight);
        self.add_p(a, b, -2.0 * weight);
    }

    /// Solve with OSQP, optionally warm started from `x0`
    fn solve(&self, settings: &SolverSettings, x0: Option<&[f64]>) -> OptimizerResult<QpSolution> {
        if let Some(row) = (0..self.num_constraints()).find(|&i| self.l[i] > self.u[i]) {
            return Err(OptimizerError::Infeasible(format!(
                "constraint row {} has lower bound {:.4} above upper bound {:.4}",
                row, self.l[row], self.u[row]
            )));
        }

        let osqp_settings = Settings::default()
            .verbose(false)
            .max_iter(settings.max_iter)
            .eps_abs(settings.eps_abs)
            .eps_rel(settings.eps_rel)
            .eps_prim_inf(settings.eps_prim_inf)
            .rho(settings.rho)
            .sigma(settings.sigma)
            .alpha(settings.alpha)
            .polish(true)
            .warm_start(x0.is_some());
        let p = to_csc(self.n, self.n, &self.p);
        let a = to_csc(self.num_constraints(), self.n, &self.a);
        let mut problem = Problem::new(p, &self.q, a, &self.l, &self.u, &osqp_settings)
            .map_err(|e| OptimizerError::Numerical(format!("QP setup failed: {:?}", e)))?;
        if let Some(x0) = x0 {
            problem.warm_start_x(x0);
        }

        let status = problem.solve();
        let iterations = status.iter();
        match status {
            Status::Solved(solution) | Status::SolvedInaccurate(solution) => {
                Ok(QpSolution { x: solution.x().to_vec(), iterations })
            }
            Status::PrimalInfeasible(_) | Status::PrimalInfeasibleInaccurate(_) => Err(OptimizerError::Infeasible(
                format!("QP certified primal infeasible after {} iterations", iterations),
            )),
            Status::MaxIterationsReached(_) => Err(OptimizerError::Infeasible(format!(
                "QP did not converge within {} iterations",
                iterations
            ))),
            _ => Err(OptimizerError::Numerical(format!(
                "QP solver failed after {} iterations",
                iterations
            ))),
        }
    }
}

/// Primal solution of a QP
#[derive(Debug, Clone)]
struct QpSolution {
    x: Vec<f64>,
    iterations: u32,
}

fn to_csc(nrows: usize, ncols: usize, entries: &BTreeMap<(usize, usize), f64>) -> CscMatrix<'static> {
    let mut indptr = vec![0; ncols + 1];
    let mut indices = Vec::with_capacity(entries.len());
    let mut data = Vec::with_capacity(entries.len());
    for (&(col, row), &value) in entries {
        indptr[col + 1] += 1;
        indices.push(row);
        data.push(value);
    }
    for col in 0..ncols {
        indptr[col + 1] += indptr[col];
    }
    CscMatrix {
        nrows,
        ncols,
        indptr: Cow::Owned(indptr),
        indices: Cow::Owned(indices),
        data: Cow::Owned(data),
    }
}

/// Everything one solve needs besides the configuration
struct FrenetInput<'a> {
    stations: &'a [Station],
    bounds: &'a [StationBounds],
    offsets: [f64; 3],
    start: (f64, f64),
    end: (f64, f64),
}

/// Lateral offset and heading error of `state` in the frame of `station`
fn frenet_of(station: &State, state: &State) -> (f64, f64) {
    let d = state.position().to_vector() - station.position().to_vector();
    (d.dot(&station.normal()), angle_diff(state.heading, station.heading))
}

/// Offset of `state` along the heading of `station`
fn longitudinal_of(station: &State, state: &State) -> f64 {
    let d = state.position().to_vector() - station.position().to_vector();
    d.dot(&station.tangent())
}

/// Trajectory optimizer over segmented reference stations
pub struct TrajectoryOptimizer<'c> {
    config: &'c Config,
}

impl<'c> TrajectoryOptimizer<'c> {
    pub fn new(config: &'c Config) -> Self {
        Self { config }
    }

    /// Optimize a path through `stations` within `bounds`.
    ///
    /// `offsets` are the longitudinal positions of the rear, center and front
    /// circles from the station point. Returns one state per station; the
    /// first state is the start state.
    pub fn optimize(
        &self,
        stations: &[Station],
        bounds: &[StationBounds],
        offsets: [f64; 3],
        vehicle: &VehicleState,
    ) -> OptimizerResult<Vec<State>> {
        if stations.len() < 2 {
            return Err(OptimizerError::InsufficientInput { usable: stations.len() });
        }
        if bounds.len() != stations.len() {
            return Err(OptimizerError::Numerical(format!(
                "{} corridor bounds for {} stations",
                bounds.len(),
                stations.len()
            )));
        }
        self.check_boundaries(stations, vehicle)?;
        let last = stations.len() - 1;
        let input = FrenetInput {
            stations,
            bounds,
            offsets,
            start: frenet_of(&stations[0].state, &vehicle.start),
            end: frenet_of(&stations[last].state, &vehicle.end),
        };
        self.check_end_heading(&input)?;

        let mut limits = vec![self.config.max_curvature() * CURVATURE_MARGIN; last];
        let mut margins = vec![[0.0; 3]; stations.len()];

        for round in 0..=self.config.solver.max_refinements {
            self.check_margins(&input, &margins)?;
            let traj = self.solve_frenet(&input, &limits, &margins)?;
            let states = self.snap_boundary(reconstruct(stations, &traj), vehicle);

            let violated = self.tighten(&input, &states, &mut limits, &mut margins);
            if violated == 0 {
                debug!("trajectory verified after {} refinement round(s)", round);
                return Ok(states);
            }
            debug!("refinement round {}: {} violated rows tightened", round, violated);
        }

        Err(OptimizerError::Infeasible(format!(
            "constraints still violated after {} refinement rounds",
            self.config.solver.max_refinements
        )))
    }

    /// Pinned boundary poses must lie on the normal of their station
    fn check_boundaries(&self, stations: &[Station], vehicle: &VehicleState) -> OptimizerResult<()> {
        let ahead = longitudinal_of(&stations[0].state, &vehicle.start);
        if ahead.abs() > BOUNDARY_TOLERANCE {
            return Err(OptimizerError::DegenerateGeometry(format!(
                "start lies {:.3} m along the reference from its first station",
                ahead
            )));
        }
        if self.config.exact_end_position {
            let last = stations.len() - 1;
            let ahead = longitudinal_of(&stations[last].state, &vehicle.end);
            if ahead.abs() > BOUNDARY_TOLERANCE {
                return Err(OptimizerError::DegenerateGeometry(format!(
                    "end lies {:.3} m along the reference from its last station",
                    ahead
                )));
            }
        }
        Ok(())
    }

    /// The end heading must be reachable with the curvature bound over the path length
    fn check_end_heading(&self, input: &FrenetInput) -> OptimizerResult<()> {
        if !self.config.constraint_end_heading {
            return Ok(());
        }
        let length: f64 = input.stations.iter().map(|s| s.ds).sum();
        let reference_turn: f64 = input.stations.iter().map(|s| s.kappa * s.ds).sum();
        let required = reference_turn + input.end.1 - input.start.1;
        let reachable = self.config.max_curvature() * length;
        if required.abs() > reachable {
            return Err(OptimizerError::Infeasible(format!(
                "end heading needs a turn of {:.3} rad, at most {:.3} rad reachable",
                required, reachable
            )));
        }
        Ok(())
    }

    fn check_margins(&self, input: &FrenetInput, margins: &[[f64; 3]]) -> OptimizerResult<()> {
        for i in 1..input.stations.len() {
            for j in 0..3 {
                let (lb, ub) = input.bounds[i][j];
                if lb + margins[i][j] > ub - margins[i][j] {
                    return Err(OptimizerError::Infeasible(format!(
                        "no lateral room left at station {} for the {} circle",
                        i, POSITION_NAMES[j]
                    )));
                }
            }
        }
        Ok(())
    }

    /// Check the final states and tighten every violated row. Returns the number of violations.
    fn tighten(
        &self,
        input: &FrenetInput,
        states: &[State],
        limits: &mut [f64],
        margins: &mut [[f64; 3]],
    ) -> usize {
        let max_k = self.config.max_curvature();
        let mut violated = 0;
        for (i, (a, b)) in states.iter().tuple_windows().enumerate() {
            let dist = a.distance(b);
            if dist < 1e-9 {
                continue;
            }
            let ratio = angle_diff(b.heading, a.heading).abs() / dist;
            if ratio > max_k * VERIFY_MARGIN {
                limits[i] *= max_k * VERIFY_MARGIN / ratio * TIGHTEN_FACTOR;
                violated += 1;
            }
        }
        for (i, (station, state)) in input.stations.iter().zip(states.iter()).enumerate().skip(1) {
            let (e, psi) = frenet_of(&station.state, state);
            for j in 0..3 {
                let lateral = e + input.offsets[j] * psi.sin();
                let (lb, ub) = input.bounds[i][j];
                let below = lb - lateral;
                let above = lateral - ub;
                if below > COLLISION_TOLERANCE || above > COLLISION_TOLERANCE {
                    margins[i][j] += below.max(above) + COLLISION_TOLERANCE;
                    violated += 1;
                }
            }
        }
        violated
    }

    fn solve_frenet(
        &self,
        input: &FrenetInput,
        limits: &[f64],
        margins: &[[f64; 3]],
    ) -> OptimizerResult<FrenetTrajectory> {
        let n = input.stations.len();
        let rounds = match self.config.optimization_method {
            OptimizationMethod::Qp => 1,
            OptimizationMethod::Sqp => self.config.solver.max_sqp_iter.max(1),
        };

        let mut current = FrenetTrajectory::zeros(n);
        let mut warm_start: Option<Vec<f64>> = None;
        for it in 0..rounds {
            let qp = self.build_qp(input, limits, margins, &current, it > 0);
            let solution = qp.solve(&self.config.solver, warm_start.as_deref())?;
            let next = FrenetTrajectory::from_slice(&solution.x, n);
            let change = next.max_lateral_change(&current);
            debug!(
                "{} iteration {}: {} OSQP iterations, lateral change {:.2e}",
                self.config.optimization_method, it, solution.iterations, change
            );
            warm_start = Some(solution.x);
            current = next;
            if change < self.config.solver.sqp_tolerance {
                break;
            }
        }
        Ok(current)
    }

    /// Assemble the QP linearized around `lin`
    fn build_qp(
        &self,
        input: &FrenetInput,
        limits: &[f64],
        margins: &[[f64; 3]],
        lin: &FrenetTrajectory,
        proximity: bool,
    ) -> QpProblem {
        let n_st = input.stations.len();
        let n_seg = n_st - 1;
        let ie = |i: usize| i;
        let ip = |i: usize| n_st + i;
        let ik = |i: usize| 2 * n_st + i;

        let exact_end = self.config.exact_end_position;
        let end_heading = self.config.constraint_end_heading;
        let n_rows = 2 + 2 * n_seg + n_seg + 3 * n_seg + exact_end as usize + end_heading as usize;
        let mut qp = QpProblem::new(2 * n_st + n_seg, n_rows);

        let w = &self.config.weights;
        for i in 0..n_st {
            qp.add_square(ie(i), 0.0, w.deviation);
            if proximity {
                qp.add_square(ie(i), lin.e[i], w.proximity);
                qp.add_square(ip(i), lin.psi[i], w.proximity);
            }
        }
        for i in 0..n_seg {
            qp.add_square(ik(i), 0.0, w.curvature);
        }
        for i in 0..n_seg.saturating_sub(1) {
            let ds = input.stations[i].ds;
            qp.add_difference(ik(i), ik(i + 1), w.curvature_rate / (ds * ds));
        }
        if !exact_end {
            qp.add_square(ie(n_seg), input.end.0, w.end_position);
        }
        if !end_heading {
            qp.add_square(ip(n_seg), input.end.1, w.end_heading);
        }

        let mut row = 0;
        let fix = |qp: &mut QpProblem, row: &mut usize, idx: usize, value: f64| {
            qp.set_a(*row, idx, 1.0);
            qp.set_bounds(*row, value, value);
            *row += 1;
        };
        fix(&mut qp, &mut row, ie(0), input.start.0);
        fix(&mut qp, &mut row, ip(0), input.start.1);
        if exact_end {
            fix(&mut qp, &mut row, ie(n_seg), input.end.0);
        }
        if end_heading {
            fix(&mut qp, &mut row, ip(n_seg), input.end.1);
        }

        for i in 0..n_seg {
            let st = &input.stations[i];
            let (ds, kr) = (st.ds, st.kappa);
            let e = lin.e[i];
            let psi = lin.psi[i].max(-MAX_LINEARIZATION_HEADING).min(MAX_LINEARIZATION_HEADING);
            let k = lin.k[i];
            let (sin, cos, tan) = (psi.sin(), psi.cos(), psi.tan());
            let scale = 1.0 - kr * e;

            // e[i+1] - de*e[i] - dpsi*psi[i] = f - de*e - dpsi*psi
            let f_e = e + ds * scale * tan;
            let de = 1.0 - ds * kr * tan;
            let dpsi = ds * scale / (cos * cos);
            qp.set_a(row, ie(i + 1), 1.0);
            qp.set_a(row, ie(i), -de);
            qp.set_a(row, ip(i), -dpsi);
            let rhs = f_e - de * e - dpsi * psi;
            qp.set_bounds(row, rhs, rhs);
            row += 1;

            let f_psi = psi + ds * (k * scale / cos - kr);
            let de = -ds * k * kr / cos;
            let dpsi = 1.0 + ds * k * scale * sin / (cos * cos);
            let dk = ds * scale / cos;
            qp.set_a(row, ip(i + 1), 1.0);
            qp.set_a(row, ie(i), -de);
            qp.set_a(row, ip(i), -dpsi);
            qp.set_a(row, ik(i), -dk);
            let rhs = f_psi - de * e - dpsi * psi - dk * k;
            qp.set_bounds(row, rhs, rhs);
            row += 1;

            qp.set_a(row, ik(i), 1.0);
            qp.set_bounds(row, -limits[i], limits[i]);
            row += 1;
        }

        // lb <= e + a*sin(psi) <= ub, linearized in psi
        for i in 1..n_st {
            let psi = lin.psi[i].max(-MAX_LINEARIZATION_HEADING).min(MAX_LINEARIZATION_HEADING);
            for j in 0..3 {
                let a = input.offsets[j];
                let constant = a * (psi.sin() - psi.cos() * psi);
                let (lb, ub) = input.bounds[i][j];
                qp.set_a(row, ie(i), 1.0);
                qp.set_a(row, ip(i), a * psi.cos());
                qp.set_bounds(row, lb + margins[i][j] - constant, ub - margins[i][j] - constant);
                row += 1;
            }
        }
        debug_assert_eq!(row, n_rows);
        qp
    }

    /// Pin the boundary states exactly where they are hard-constrained
    fn snap_boundary(&self, mut states: Vec<State>, vehicle: &VehicleState) -> Vec<State> {
        if let Some(first) = states.first_mut() {
            first.x = vehicle.start.x;
            first.y = vehicle.start.y;
            first.heading = normalize_angle(vehicle.start.heading);
        }
        if let Some(last) = states.last_mut() {
            if self.config.exact_end_position {
                last.x = vehicle.end.x;
                last.y = vehicle.end.y;
            }
            if self.config.constraint_end_heading {
                last.heading = normalize_angle(vehicle.end.heading);
            }
        }
        states
    }
}

/// Cartesian states of a Frenet trajectory, one per station
pub fn reconstruct(stations: &[Station], traj: &FrenetTrajectory) -> Vec<State> {
    stations
        .iter()
        .enumerate()
        .map(|(i, st)| {
            let p = st.state.offset(0.0, traj.e[i]);
            let k = traj.k.get(i).or_else(|| traj.k.last()).copied().unwrap_or(0.0);
            State::new(p.x, p.y, normalize_angle(st.state.heading + traj.psi[i])).with_curvature(k)
        })
        .collect()
}

/// Resample a polyline of states every `interval` meters of arc length.
///
/// Positions are interpolated linearly and headings along the shorter arc,
/// so the heading change per distance never exceeds that of the input
/// segments. The last state is always kept.
pub fn resample(states: &[State], interval: f64) -> Vec<State> {
    let (first, last) = match (states.first(), states.last()) {
        (Some(first), Some(last)) if states.len() > 1 && interval > 0.0 => (*first, *last),
        _ => return states.to_vec(),
    };
    let mut out = vec![first];
    let mut next_s = interval;
    let mut segment_start = 0.0;
    for (a, b) in states.iter().tuple_windows() {
        let len = a.distance(b);
        while next_s < segment_start + len - 1e-9 {
            let t = (next_s - segment_start) / len;
            let heading = normalize_angle(a.heading + t * angle_diff(b.heading, a.heading));
            out.push(State::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y), heading).with_curvature(a.curvature));
            next_s += interval;
        }
        segment_start += len;
    }
    out.push(last);
    out
}
