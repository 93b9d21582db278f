use thiserror::Error;

/// Errors produced when caller-supplied content violates a record invariant.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("hero slides must be exactly {expected} image keys, got {actual}")]
    HeroSlideCount { expected: usize, actual: usize },

    #[error("project name must not be empty")]
    EmptyName,

    #[error("{field} must be a finite number, got {value}")]
    NonFiniteCoordinate { field: &'static str, value: f64 },

    #[error("{field} {value} is outside [{min}, {max}]")]
    CoordinateOutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("project must have at least {min} image(s)")]
    TooFewImages { min: usize },

    #[error("project cannot have more than {max} images, got {actual}")]
    TooManyImages { max: usize, actual: usize },
}
