//! Train/validate loop for Candle models.
//!
//! [`Trainer::fit`] runs a fixed number of epochs. Each epoch is one training
//! pass (forward, loss, backward, optimizer step) followed by one validation
//! pass (forward and loss only), and yields an [`EpochMetrics`] report with
//! sample-weighted loss and accuracy for both passes. [`Callback`]s observe
//! the run at phase, batch and epoch boundaries.

pub mod callbacks;
pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod module;
pub mod trainer;

pub use callbacks::{Callback, EarlyStopping, LogFormat, MetricsLogger, Mode, ModelCheckpoint};
pub use config::TrainerConfig;
pub use data::{Batch, BatchSource, DataLoader};
pub use error::{FitError, Result};
pub use loss::{CrossEntropy, LossFn, Mse};
pub use metrics::{EpochMetrics, PhaseStats};
pub use module::{LightModule, Phase, StepOutput};
pub use trainer::Trainer;

pub use candle_nn::Optimizer;
