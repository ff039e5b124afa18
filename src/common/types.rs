//! Common types used throughout path_optimizer

use nalgebra::Vector2;
use std::f64::consts::PI;

/// 2D point representation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn origin() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point2D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn to_vector(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point2D {
    fn from(tuple: (f64, f64)) -> Self {
        Self { x: tuple.0, y: tuple.1 }
    }
}

impl From<Vector2<f64>> for Point2D {
    fn from(v: Vector2<f64>) -> Self {
        Self { x: v[0], y: v[1] }
    }
}

/// Geometric path sample: position, heading and optional curvature/velocity.
///
/// Used for reference points, smoothed points and the final output.
/// `curvature` and `velocity` default to zero when unknown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct State {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub curvature: f64,
    pub velocity: f64,
}

impl State {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading, curvature: 0.0, velocity: 0.0 }
    }

    pub fn with_curvature(mut self, curvature: f64) -> Self {
        self.curvature = curvature;
        self
    }

    pub fn with_velocity(mut self, velocity: f64) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    pub fn distance(&self, other: &State) -> f64 {
        self.position().distance(&other.position())
    }

    /// Unit vector along the heading
    pub fn tangent(&self) -> Vector2<f64> {
        Vector2::new(self.heading.cos(), self.heading.sin())
    }

    /// Unit vector pointing to the left of the heading
    pub fn normal(&self) -> Vector2<f64> {
        Vector2::new(-self.heading.sin(), self.heading.cos())
    }

    /// Point shifted `longitudinal` along the heading and `lateral` to the left
    pub fn offset(&self, longitudinal: f64, lateral: f64) -> Point2D {
        let p = self.position().to_vector() + self.tangent() * longitudinal + self.normal() * lateral;
        Point2D::from(p)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.heading.is_finite()
    }
}

impl From<Point2D> for State {
    fn from(p: Point2D) -> Self {
        State::new(p.x, p.y, 0.0)
    }
}

/// Start and end boundary states of one planning request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleState {
    pub start: State,
    pub end: State,
}

impl VehicleState {
    pub fn new(start: State, end: State) -> Self {
        Self { start, end }
    }
}

/// Normalize angle to [-pi, pi]
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// Signed smallest difference `a - b`
pub fn angle_diff(a: f64, b: f64) -> f64 {
    normalize_angle(a - b)
}

/// Total polyline length of a state sequence
pub fn path_length(states: &[State]) -> f64 {
    states.windows(2).map(|w| w[0].distance(&w[1])).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point2d_distance() {
        let p1 = Point2D::new(0.0, 0.0);
        let p2 = Point2D::new(3.0, 4.0);
        assert!((p1.distance(&p2) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_normalize_angle() {
        assert!((normalize_angle(2.0 * PI + 0.5) - 0.5).abs() < 1e-9);
        assert!((normalize_angle(-2.0 * PI - 0.5) + 0.5).abs() < 1e-9);
        assert!((normalize_angle(1.5 * PI) + 0.5 * PI).abs() < 1e-9);
        assert!((normalize_angle(0.5) - 0.5).abs() < 1e-12);
        assert!((angle_diff(-3.0, 3.0) - (2.0 * PI - 6.0)).abs() < 1e-9);
    }

    #[test]
    fn test_state_offset() {
        let s = State::new(1.0, 1.0, PI / 2.0);
        let p = s.offset(2.0, 1.0);
        assert!((p.x - 0.0).abs() < 1e-9);
        assert!((p.y - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_path_length() {
        let states = vec![State::new(0.0, 0.0, 0.0), State::new(1.0, 0.0, 0.0), State::new(1.0, 1.0, 0.0)];
        assert!((path_length(&states) - 2.0).abs() < 1e-10);
        assert_eq!(path_length(&states[..1]), 0.0);
    }
}
