use std::{
    error::Error,
    fmt::{self, Display},
};

use ndarray::ShapeError;

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    ShapeMismatch {
        what: &'static str,
        got: Vec<usize>,
        expected: Vec<usize>,
    },
    InvalidTarget {
        class: usize,
        num_classes: usize,
    },
    InvalidConfig(String),
    InvalidOptimizerState(String),
    Reshape(String),
    Device(String),
    GradientSync(String),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            MlErr::ShapeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a shape mismatch in {what}, got {got:?} and expected {expected:?}"
            ),
            MlErr::InvalidTarget { class, num_classes } => write!(
                f,
                "Target class {class} is out of range for {num_classes} classes"
            ),
            MlErr::InvalidConfig(detail) => write!(f, "Invalid model configuration: {detail}"),
            MlErr::InvalidOptimizerState(detail) => {
                write!(f, "Invalid optimizer state: {detail}")
            }
            MlErr::Reshape(detail) => write!(f, "Failed to reshape a tensor: {detail}"),
            MlErr::Device(detail) => write!(f, "Failed to set up the compute device: {detail}"),
            MlErr::GradientSync(detail) => write!(f, "Failed to synchronize gradients: {detail}"),
        }
    }
}

impl Error for MlErr {}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Reshape(value.to_string())
    }
}
