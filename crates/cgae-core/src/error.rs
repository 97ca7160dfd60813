use thiserror::Error;

/// Errors raised by the coarse-graining pipeline.
///
/// Configuration variants are raised during setup, before any training step.
/// Numerical degeneracies (coincident atom and site, all-equal logits) are not
/// errors and never surface here.
#[derive(Debug, Error)]
pub enum CgError {
    #[error("Invalid representation signature: {0}")]
    InvalidSignature(String),

    #[error("System must contain at least one {what}")]
    EmptySystem { what: &'static str },

    #[error("Unknown activation '{0}' (expected one of: sigmoid, tanh, relu, absolute)")]
    UnknownActivation(String),

    #[error("Unsupported policy combination: {0}")]
    UnsupportedPolicy(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Singular linear system: {0}")]
    Singular(String),

    #[error("Tensor data conversion failed: {0}")]
    TensorData(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Failed to record module: {0}")]
    Record(String),
}

pub type Result<T> = std::result::Result<T, CgError>;

impl CgError {
    pub fn shape(what: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        CgError::ShapeMismatch {
            what: what.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Whether this error belongs to the configuration class (fatal at setup).
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            CgError::InvalidSignature(_)
                | CgError::EmptySystem { .. }
                | CgError::UnknownActivation(_)
                | CgError::UnsupportedPolicy(_)
                | CgError::InvalidConfig(_)
        )
    }
}
