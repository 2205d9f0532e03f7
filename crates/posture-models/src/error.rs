//! Validation errors raised when constructing model values.

use thiserror::Error;

/// Result type for model construction.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// A model value was constructed from out-of-range input.
///
/// These indicate a bug in the arithmetic that produced the value and are
/// never recovered from locally.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be between 0.0 and 1.0, got {value}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("pose must have exactly 17 keypoints, got {0}")]
    KeypointCount(usize),

    #[error("keypoint {index} must be {expected}, got {found}")]
    KeypointOrder {
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
}

impl ValidationError {
    pub(crate) fn out_of_range(field: &'static str, value: f64) -> Self {
        Self::OutOfRange { field, value }
    }
}

/// Check that `value` lies in the closed unit interval.
pub(crate) fn check_unit(field: &'static str, value: f64) -> ValidationResult<f64> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::out_of_range(field, value))
    }
}

/// Clip `value` into the closed unit interval. NaN maps to 0.0.
pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
