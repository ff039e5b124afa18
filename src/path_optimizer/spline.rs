// Cubic spline interpolation over arc length
//
// Natural cubic spline per coordinate, parameterized by cumulative chord length.
// Ref: https://github.com/AtsushiSakai/PythonRobotics/tree/master/PathPlanning/CubicSpline

use nalgebra as na;

use crate::common::{OptimizerError, OptimizerResult};

#[derive(Debug, Clone)]
struct Spline {
    a: Vec<f64>,
    b: Vec<f64>,
    c: Vec<f64>,
    d: Vec<f64>,
    x: Vec<f64>,
}

impl Spline {
    fn new(x: &[f64], y: &[f64]) -> OptimizerResult<Spline> {
        let nx = x.len();
        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        if h.iter().any(|&hi| !(hi > 0.0)) {
            return Err(OptimizerError::DegenerateGeometry(
                "spline knots must be strictly increasing".to_string(),
            ));
        }

        let a = y.to_vec();
        let a_mat = Self::calc_a(&h);
        let b_mat = Self::calc_b(&h, &a);
        let c_na = a_mat
            .lu()
            .solve(&b_mat)
            .ok_or_else(|| OptimizerError::Numerical("singular spline system".to_string()))?;
        let c: Vec<f64> = c_na.iter().copied().collect();

        let mut b = Vec::with_capacity(nx - 1);
        let mut d = Vec::with_capacity(nx - 1);
        for i in 0..nx - 1 {
            d.push((c[i + 1] - c[i]) / (3.0 * h[i]));
            b.push((a[i + 1] - a[i]) / h[i] - h[i] * (c[i + 1] + 2.0 * c[i]) / 3.0);
        }

        Ok(Spline { a, b, c, d, x: x.to_vec() })
    }

    fn calc(&self, t: f64) -> f64 {
        let i = self.search_index(t);
        let dx = t - self.x[i];
        self.a[i] + self.b[i] * dx + self.c[i] * dx.powi(2) + self.d[i] * dx.powi(3)
    }

    fn calcd(&self, t: f64) -> f64 {
        let i = self.search_index(t);
        let dx = t - self.x[i];
        self.b[i] + 2.0 * self.c[i] * dx + 3.0 * self.d[i] * dx.powi(2)
    }

    fn calcdd(&self, t: f64) -> f64 {
        let i = self.search_index(t);
        let dx = t - self.x[i];
        2.0 * self.c[i] + 6.0 * self.d[i] * dx
    }

    /// Segment index with x[i] <= t, clamped to the valid segments
    fn search_index(&self, t: f64) -> usize {
        let idx = self.x.partition_point(|&xi| xi <= t);
        idx.saturating_sub(1).min(self.x.len() - 2)
    }

    fn calc_a(h: &[f64]) -> na::DMatrix<f64> {
        let nx = h.len() + 1;
        let mut a = na::DMatrix::zeros(nx, nx);
        a[(0, 0)] = 1.0;
        for i in 0..nx - 1 {
            if i != nx - 2 {
                a[(i + 1, i + 1)] = 2.0 * (h[i] + h[i + 1]);
            }
            a[(i + 1, i)] = h[i];
            a[(i, i + 1)] = h[i];
        }
        a[(0, 1)] = 0.0;
        a[(nx - 1, nx - 2)] = 0.0;
        a[(nx - 1, nx - 1)] = 1.0;
        a
    }

    fn calc_b(h: &[f64], a: &[f64]) -> na::DVector<f64> {
        let nx = h.len() + 1;
        let mut b = na::DVector::zeros(nx);
        for i in 0..nx.saturating_sub(2) {
            b[i + 1] = 3.0 * (a[i + 2] - a[i + 1]) / h[i + 1] - 3.0 * (a[i + 1] - a[i]) / h[i];
        }
        b
    }
}

/// 2D cubic spline parameterized by arc length
#[derive(Debug, Clone)]
pub struct Spline2D {
    pub s: Vec<f64>,
    sx: Spline,
    sy: Spline,
}

impl Spline2D {
    pub fn new(x: &[f64], y: &[f64]) -> OptimizerResult<Spline2D> {
        if x.len() != y.len() {
            return Err(OptimizerError::DegenerateGeometry("x and y must have same length".to_string()));
        }
        if x.len() < 2 {
            return Err(OptimizerError::InsufficientInput { usable: x.len() });
        }
        let s = Self::calc_s(x, y);
        let sx = Spline::new(&s, x)?;
        let sy = Spline::new(&s, y)?;
        Ok(Spline2D { s, sx, sy })
    }

    fn calc_s(x: &[f64], y: &[f64]) -> Vec<f64> {
        let mut s = Vec::with_capacity(x.len());
        s.push(0.0);
        for i in 0..x.len() - 1 {
            let ds = ((x[i + 1] - x[i]).powi(2) + (y[i + 1] - y[i]).powi(2)).sqrt();
            s.push(s[i] + ds);
        }
        s
    }

    /// Total parameter length
    pub fn s_end(&self) -> f64 {
        self.s[self.s.len() - 1]
    }

    pub fn calc_position(&self, is: f64) -> (f64, f64) {
        (self.sx.calc(is), self.sy.calc(is))
    }

    pub fn calc_yaw(&self, is: f64) -> f64 {
        let dx = self.sx.calcd(is);
        let dy = self.sy.calcd(is);
        dy.atan2(dx)
    }

    pub fn calc_curvature(&self, is: f64) -> f64 {
        let dx = self.sx.calcd(is);
        let ddx = self.sx.calcdd(is);
        let dy = self.sy.calcd(is);
        let ddy = self.sy.calcdd(is);
        let denom = (dx.powi(2) + dy.powi(2)).powf(1.5);
        if denom < 1e-12 {
            return 0.0;
        }
        (ddy * dx - ddx * dy) / denom
    }
}
