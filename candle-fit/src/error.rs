//! Errors raised by the training loop.

use crate::module::Phase;

#[derive(Debug, thiserror::Error)]
pub enum FitError {
    /// A phase finished without seeing a single sample.
    #[error("empty dataset: the {phase} pass produced no samples")]
    EmptyDataset { phase: Phase },

    #[error(
        "shape mismatch in {phase} batch {batch_idx}: inputs {inputs:?}, labels {labels:?}"
    )]
    ShapeMismatch {
        phase: Phase,
        batch_idx: usize,
        inputs: Vec<usize>,
        labels: Vec<usize>,
    },

    /// Raised before the optimizer step, parameters are left untouched.
    #[error("non-finite loss {value} in {phase} batch {batch_idx} of epoch {epoch}")]
    NonFiniteLoss {
        phase: Phase,
        epoch: usize,
        batch_idx: usize,
        value: f32,
    },

    #[error("device mismatch for {what}: expected {expected}, found {found}")]
    DeviceMismatch {
        what: String,
        expected: String,
        found: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Candle(#[from] candle::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FitError>;
