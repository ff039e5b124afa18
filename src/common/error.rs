//! Error types for path_optimizer

use thiserror::Error;

/// Main error type for the path optimization pipeline
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptimizerError {
    /// Too few usable reference points
    #[error("Insufficient input: {usable} usable reference point(s), at least 2 required")]
    InsufficientInput { usable: usize },
    /// Coincident points, non-finite coordinates or an undefined heading
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),
    /// Query point outside the map coverage
    #[error("Out of map bounds at ({x:.3}, {y:.3})")]
    OutOfMapBounds { x: f64, y: f64 },
    /// No state sequence satisfies the hard constraints
    #[error("Infeasible: {0}")]
    Infeasible(String),
    /// Unknown parameter name or out-of-domain value
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    /// Numerical computation failed (factorization, etc.)
    #[error("Numerical error: {0}")]
    Numerical(String),
}

impl OptimizerError {
    /// Whether the error stems from the reference input rather than the environment.
    ///
    /// Only these errors allow the search seeder to replace the reference.
    pub fn is_reference_rejection(&self) -> bool {
        matches!(
            self,
            OptimizerError::InsufficientInput { .. } | OptimizerError::DegenerateGeometry(_)
        )
    }
}

/// Result type alias for path optimization
pub type OptimizerResult<T> = Result<T, OptimizerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OptimizerError::Infeasible("station 4 is blocked".to_string());
        assert_eq!(format!("{}", err), "Infeasible: station 4 is blocked");

        let err = OptimizerError::InsufficientInput { usable: 1 };
        assert!(format!("{}", err).contains("1 usable"));
    }

    #[test]
    fn test_reference_rejection() {
        assert!(OptimizerError::InsufficientInput { usable: 0 }.is_reference_rejection());
        assert!(OptimizerError::DegenerateGeometry("x".into()).is_reference_rejection());
        assert!(!OptimizerError::Infeasible("x".into()).is_reference_rejection());
        assert!(!OptimizerError::OutOfMapBounds { x: 0.0, y: 0.0 }.is_reference_rejection());
    }
}
