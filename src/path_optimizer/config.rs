//! Configuration of the path optimizer
//!
//! Primary vehicle geometry is private and only changes through setters, so the
//! covering-circle parameters derived from it are never stale.

use std::convert::TryFrom;
use std::f64::consts::FRAC_PI_2;
use std::fmt;
use std::str::FromStr;

use crate::common::{OptimizerError, OptimizerResult};

/// Numerical formulation used by the trajectory optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationMethod {
    /// Single QP linearized around the reference path
    Qp,
    /// Sequential QP, relinearized around the previous solution
    Sqp,
}

impl OptimizationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizationMethod::Qp => "qp",
            OptimizationMethod::Sqp => "sqp",
        }
    }
}

impl fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptimizationMethod {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qp" | "0" => Ok(OptimizationMethod::Qp),
            "sqp" | "1" => Ok(OptimizationMethod::Sqp),
            other => Err(OptimizerError::InvalidConfig(format!(
                "unsupported optimization method '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<i64> for OptimizationMethod {
    type Error = OptimizerError;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(OptimizationMethod::Qp),
            1 => Ok(OptimizationMethod::Sqp),
            other => Err(OptimizerError::InvalidConfig(format!(
                "unsupported optimization method code {}",
                other
            ))),
        }
    }
}

/// Covering circles of the rectangular vehicle footprint.
///
/// Offsets are measured from the geometric center along the longitudinal axis,
/// rear-most first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoveringCircles {
    pub radius: f64,
    pub offsets: [f64; 4],
}

impl CoveringCircles {
    pub fn from_footprint(car_length: f64, car_width: f64) -> Self {
        Self {
            radius: ((car_length / 8.0).powi(2) + (car_width / 2.0).powi(2)).sqrt(),
            offsets: [
                -3.0 / 8.0 * car_length,
                -1.0 / 8.0 * car_length,
                1.0 / 8.0 * car_length,
                3.0 / 8.0 * car_length,
            ],
        }
    }
}

/// Reference smoothing parameters
#[derive(Debug, Clone)]
pub struct SmoothingConfig {
    /// Weight of deviation from the input samples
    pub weight_deviation: f64,
    /// Weight of the squared second difference (discrete curvature)
    pub weight_smoothness: f64,
    /// Spacing of the dense samples that are smoothed [m]
    pub sample_spacing: f64,
    /// Input filter: points closer than this to the previous kept point are dropped [m]
    pub min_point_spacing: f64,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            weight_deviation: 1.0,
            weight_smoothness: 50.0,
            sample_spacing: 0.5,
            min_point_spacing: 0.1,
        }
    }
}

/// Cost weights of the trajectory optimization
#[derive(Debug, Clone)]
pub struct CostWeights {
    pub curvature: f64,
    pub curvature_rate: f64,
    pub deviation: f64,
    /// Soft end-position weight, used when the end position is not exact
    pub end_position: f64,
    /// Soft end-heading weight, used when the end heading is not constrained
    pub end_heading: f64,
    /// Proximity to the previous iterate in sequential solves
    pub proximity: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            curvature: 10.0,
            curvature_rate: 50.0,
            deviation: 0.1,
            end_position: 100.0,
            end_heading: 100.0,
            proximity: 1.0,
        }
    }
}

/// QP solver settings, handed to OSQP
#[derive(Debug, Clone)]
pub struct SolverSettings {
    pub max_iter: u32,
    pub eps_abs: f64,
    pub eps_rel: f64,
    /// Tolerance of the primal infeasibility certificate
    pub eps_prim_inf: f64,
    pub rho: f64,
    pub sigma: f64,
    /// Over-relaxation parameter in (0, 2)
    pub alpha: f64,
    /// Maximum relinearizations of the sequential method
    pub max_sqp_iter: usize,
    /// Sequential method stops when no lateral offset moves more than this [m]
    pub sqp_tolerance: f64,
    /// Tighten-and-resolve rounds of the feasibility verification
    pub max_refinements: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iter: 20000,
            eps_abs: 1e-5,
            eps_rel: 1e-5,
            eps_prim_inf: 1e-4,
            rho: 0.1,
            sigma: 1e-6,
            alpha: 1.6,
            max_sqp_iter: 8,
            sqp_tolerance: 1e-3,
            max_refinements: 6,
        }
    }
}

/// Path optimizer configuration
#[derive(Debug, Clone)]
pub struct Config {
    car_width: f64,
    car_length: f64,
    wheel_base: f64,
    rear_axle_to_center: f64,
    max_steer_angle: f64,
    circles: CoveringCircles,

    /// Filter near-duplicate and reversing input points before smoothing
    pub modify_input_points: bool,
    /// Hard constraint on the end heading
    pub constraint_end_heading: bool,
    /// Hard constraint on the end lateral position
    pub exact_end_position: bool,
    /// Extra clearance added to every collision query [m]
    pub expected_safety_margin: f64,
    /// Emit the optimizer stations instead of the resampled path, and return
    /// the smoothed path as a degraded result when the solve is infeasible
    pub raw_result: bool,
    /// Output sampling interval [m]
    pub output_interval: f64,
    /// Verbose per-stage logging
    pub info_output: bool,
    pub optimization_method: OptimizationMethod,
    /// Replace a rejected reference with a grid search path
    pub use_search_fallback: bool,
    /// Arc length between segmentation stations [m]
    pub segment_length: f64,
    /// Lateral search range of the corridor extractor [m]
    pub max_lateral_search: f64,

    pub smoothing: SmoothingConfig,
    pub weights: CostWeights,
    pub solver: SolverSettings,
}

impl Default for Config {
    fn default() -> Self {
        let car_width = 2.0;
        let car_length = 4.9;
        Self {
            car_width,
            car_length,
            wheel_base: 2.85,
            rear_axle_to_center: 1.45,
            max_steer_angle: 35.0_f64.to_radians(),
            circles: CoveringCircles::from_footprint(car_length, car_width),
            modify_input_points: true,
            constraint_end_heading: true,
            exact_end_position: false,
            expected_safety_margin: 0.3,
            raw_result: false,
            output_interval: 0.3,
            info_output: false,
            optimization_method: OptimizationMethod::Sqp,
            use_search_fallback: false,
            segment_length: 0.5,
            max_lateral_search: 6.0,
            smoothing: SmoothingConfig::default(),
            weights: CostWeights::default(),
            solver: SolverSettings::default(),
        }
    }
}

fn positive(name: &str, value: f64) -> OptimizerResult<f64> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(OptimizerError::InvalidConfig(format!("{} must be positive, got {}", name, value)))
    }
}

impl Config {
    pub fn car_width(&self) -> f64 {
        self.car_width
    }

    pub fn car_length(&self) -> f64 {
        self.car_length
    }

    pub fn wheel_base(&self) -> f64 {
        self.wheel_base
    }

    pub fn rear_axle_to_center(&self) -> f64 {
        self.rear_axle_to_center
    }

    pub fn max_steer_angle(&self) -> f64 {
        self.max_steer_angle
    }

    pub fn circle_radius(&self) -> f64 {
        self.circles.radius
    }

    /// Circle offsets d1..d4 from the geometric center
    pub fn circle_offsets(&self) -> [f64; 4] {
        self.circles.offsets
    }

    pub fn covering_circles(&self) -> CoveringCircles {
        self.circles
    }

    /// Maximum path curvature of the bicycle model: tan(max_steer) / wheel_base
    pub fn max_curvature(&self) -> f64 {
        self.max_steer_angle.tan() / self.wheel_base
    }

    pub fn set_car_width(&mut self, value: f64) -> OptimizerResult<()> {
        self.car_width = positive("car_width", value)?;
        self.circles = CoveringCircles::from_footprint(self.car_length, self.car_width);
        Ok(())
    }

    pub fn set_car_length(&mut self, value: f64) -> OptimizerResult<()> {
        self.car_length = positive("car_length", value)?;
        self.circles = CoveringCircles::from_footprint(self.car_length, self.car_width);
        Ok(())
    }

    pub fn set_wheel_base(&mut self, value: f64) -> OptimizerResult<()> {
        self.wheel_base = positive("wheel_base", value)?;
        Ok(())
    }

    pub fn set_rear_axle_to_center(&mut self, value: f64) -> OptimizerResult<()> {
        if !value.is_finite() {
            return Err(OptimizerError::InvalidConfig(format!(
                "rear_axle_to_center must be finite, got {}",
                value
            )));
        }
        self.rear_axle_to_center = value;
        Ok(())
    }

    pub fn set_max_steer_angle(&mut self, value: f64) -> OptimizerResult<()> {
        if !(value > 0.0 && value < FRAC_PI_2) {
            return Err(OptimizerError::InvalidConfig(format!(
                "max_steer_angle must be in (0, pi/2), got {}",
                value
            )));
        }
        self.max_steer_angle = value;
        Ok(())
    }

    /// Apply a single typed update, validating its domain first
    pub fn apply(&mut self, update: ConfigUpdate) -> OptimizerResult<()> {
        match update {
            ConfigUpdate::CarWidth(v) => self.set_car_width(v),
            ConfigUpdate::CarLength(v) => self.set_car_length(v),
            ConfigUpdate::WheelBase(v) => self.set_wheel_base(v),
            ConfigUpdate::RearAxleToCenter(v) => self.set_rear_axle_to_center(v),
            ConfigUpdate::MaxSteerAngle(v) => self.set_max_steer_angle(v),
            ConfigUpdate::ModifyInputPoints(v) => {
                self.modify_input_points = v;
                Ok(())
            }
            ConfigUpdate::ConstraintEndHeading(v) => {
                self.constraint_end_heading = v;
                Ok(())
            }
            ConfigUpdate::ExactEndPosition(v) => {
                self.exact_end_position = v;
                Ok(())
            }
            ConfigUpdate::ExpectedSafetyMargin(v) => {
                if !(v.is_finite() && v >= 0.0) {
                    return Err(OptimizerError::InvalidConfig(format!(
                        "expected_safety_margin must be non-negative, got {}",
                        v
                    )));
                }
                self.expected_safety_margin = v;
                Ok(())
            }
            ConfigUpdate::RawResult(v) => {
                self.raw_result = v;
                Ok(())
            }
            ConfigUpdate::OutputInterval(v) => {
                self.output_interval = positive("output_interval", v)?;
                Ok(())
            }
            ConfigUpdate::InfoOutput(v) => {
                self.info_output = v;
                Ok(())
            }
            ConfigUpdate::OptimizationMethod(m) => {
                self.optimization_method = m;
                Ok(())
            }
            ConfigUpdate::UseSearchFallback(v) => {
                self.use_search_fallback = v;
                Ok(())
            }
            ConfigUpdate::SegmentLength(v) => {
                self.segment_length = positive("segment_length", v)?;
                Ok(())
            }
            ConfigUpdate::MaxLateralSearch(v) => {
                self.max_lateral_search = positive("max_lateral_search", v)?;
                Ok(())
            }
        }
    }
}

/// One named configuration change
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigUpdate {
    CarWidth(f64),
    CarLength(f64),
    WheelBase(f64),
    RearAxleToCenter(f64),
    MaxSteerAngle(f64),
    ModifyInputPoints(bool),
    ConstraintEndHeading(bool),
    ExactEndPosition(bool),
    ExpectedSafetyMargin(f64),
    RawResult(bool),
    OutputInterval(f64),
    InfoOutput(bool),
    OptimizationMethod(OptimizationMethod),
    UseSearchFallback(bool),
    SegmentLength(f64),
    MaxLateralSearch(f64),
}

impl ConfigUpdate {
    /// Parse a parameter name and its textual value.
    ///
    /// Names accept an optional trailing underscore (`car_length_`).
    pub fn parse(name: &str, value: &str) -> OptimizerResult<Self> {
        fn number(name: &str, value: &str) -> OptimizerResult<f64> {
            value.trim().parse::<f64>().map_err(|_| {
                OptimizerError::InvalidConfig(format!("{} expects a number, got '{}'", name, value))
            })
        }
        fn flag(name: &str, value: &str) -> OptimizerResult<bool> {
            match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "on" => Ok(true),
                "false" | "0" | "off" => Ok(false),
                _ => Err(OptimizerError::InvalidConfig(format!(
                    "{} expects a boolean, got '{}'",
                    name, value
                ))),
            }
        }

        let key = name.trim().trim_end_matches('_');
        let update = match key {
            "car_width" => ConfigUpdate::CarWidth(number(key, value)?),
            "car_length" => ConfigUpdate::CarLength(number(key, value)?),
            "wheel_base" => ConfigUpdate::WheelBase(number(key, value)?),
            "rear_axle_to_center_distance" | "rear_axle_to_center" => {
                ConfigUpdate::RearAxleToCenter(number(key, value)?)
            }
            "max_steer_angle" => ConfigUpdate::MaxSteerAngle(number(key, value)?),
            "modify_input_points" => ConfigUpdate::ModifyInputPoints(flag(key, value)?),
            "constraint_end_heading" => ConfigUpdate::ConstraintEndHeading(flag(key, value)?),
            "exact_end_position" => ConfigUpdate::ExactEndPosition(flag(key, value)?),
            "expected_safety_margin" => ConfigUpdate::ExpectedSafetyMargin(number(key, value)?),
            "raw_result" => ConfigUpdate::RawResult(flag(key, value)?),
            "output_interval" => ConfigUpdate::OutputInterval(number(key, value)?),
            "info_output" => ConfigUpdate::InfoOutput(flag(key, value)?),
            "optimization_method" => ConfigUpdate::OptimizationMethod(value.parse()?),
            "use_search_fallback" => ConfigUpdate::UseSearchFallback(flag(key, value)?),
            "segment_length" => ConfigUpdate::SegmentLength(number(key, value)?),
            "max_lateral_search" => ConfigUpdate::MaxLateralSearch(number(key, value)?),
            _ => {
                return Err(OptimizerError::InvalidConfig(format!(
                    "no config named '{}' or it can only be changed in code",
                    name
                )))
            }
        };
        Ok(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_config_defaults_consistent() {
        let config = Config::default();
        let expected = ((4.9_f64 / 8.0).powi(2) + 1.0).sqrt();
        assert_relative_eq!(config.circle_radius(), expected, epsilon = 1e-12);
        assert_relative_eq!(config.circle_offsets()[0], -3.0 / 8.0 * 4.9, epsilon = 1e-12);
        assert_relative_eq!(config.max_curvature(), 35.0_f64.to_radians().tan() / 2.85, epsilon = 1e-12);
    }

    #[test]
    fn test_set_car_length_recomputes_derived() {
        let mut config = Config::default();
        config.apply(ConfigUpdate::CarLength(8.0)).unwrap();
        assert_relative_eq!(config.circle_radius(), (1.0_f64 + 1.0).sqrt(), epsilon = 1e-12);
        assert_eq!(config.circle_offsets(), [-3.0, -1.0, 1.0, 3.0]);
        assert_relative_eq!(config.car_width(), 2.0);
    }

    #[test]
    fn test_set_car_width_recomputes_radius_only() {
        let mut config = Config::default();
        let offsets = config.circle_offsets();
        config.apply(ConfigUpdate::CarWidth(3.0)).unwrap();
        assert_relative_eq!(
            config.circle_radius(),
            ((4.9_f64 / 8.0).powi(2) + 1.5_f64.powi(2)).sqrt(),
            epsilon = 1e-12
        );
        assert_eq!(config.circle_offsets(), offsets);
    }

    #[test]
    fn test_invalid_values_rejected_without_change() {
        let mut config = Config::default();
        assert!(config.apply(ConfigUpdate::CarLength(-1.0)).is_err());
        assert!(config.apply(ConfigUpdate::MaxSteerAngle(2.0)).is_err());
        assert!(config.apply(ConfigUpdate::OutputInterval(0.0)).is_err());
        assert!(config.apply(ConfigUpdate::ExpectedSafetyMargin(f64::NAN)).is_err());
        assert_relative_eq!(config.car_length(), 4.9);
        assert_relative_eq!(config.output_interval, 0.3);
    }

    #[test]
    fn test_optimization_method_parsing() {
        assert_eq!("sqp".parse::<OptimizationMethod>().unwrap(), OptimizationMethod::Sqp);
        assert_eq!("QP".parse::<OptimizationMethod>().unwrap(), OptimizationMethod::Qp);
        assert_eq!(OptimizationMethod::try_from(1).unwrap(), OptimizationMethod::Sqp);
        assert!(matches!(
            OptimizationMethod::try_from(7),
            Err(OptimizerError::InvalidConfig(_))
        ));
        assert!("ipopt".parse::<OptimizationMethod>().is_err());
    }

    #[test]
    fn test_config_update_parse() {
        assert_eq!(ConfigUpdate::parse("car_length_", "4.0").unwrap(), ConfigUpdate::CarLength(4.0));
        assert_eq!(ConfigUpdate::parse("raw_result", "true").unwrap(), ConfigUpdate::RawResult(true));
        assert!(ConfigUpdate::parse("car_colour", "red").is_err());
        assert!(ConfigUpdate::parse("car_width", "wide").is_err());
        assert!(ConfigUpdate::parse("optimization_method_", "5").is_err());
    }
}
