//! LightModule trait for trainable models, and the phase state the loop drives.

use candle::{Result, Tensor, Var};
use std::fmt;
use std::ops::Deref;

/// Operating phase of a model. The trainer is the only caller of
/// [`LightModule::set_phase`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Stochastic layers (dropout, ...) active, gradients recorded.
    #[default]
    Train,
    /// Inference behaviour, no parameter updates.
    Validate,
}

impl Phase {
    pub fn is_train(self) -> bool {
        self == Phase::Train
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Train => f.write_str("train"),
            Phase::Validate => f.write_str("validate"),
        }
    }
}

/// Summary of one processed batch, handed to callbacks.
#[derive(Clone, Debug, PartialEq)]
pub struct StepOutput {
    /// Mean loss over the batch.
    pub loss: f32,
    pub batch_size: usize,
    /// Number of samples whose arg-max score equals the label.
    pub correct: usize,
}

impl StepOutput {
    pub fn accuracy(&self) -> f64 {
        if self.batch_size == 0 {
            return 0.0;
        }
        self.correct as f64 / self.batch_size as f64
    }
}

/// Trait for models that can be trained with [`Trainer`](crate::Trainer).
pub trait LightModule {
    /// Switch stochastic layers between training and inference behaviour.
    fn set_phase(&mut self, phase: Phase);

    /// Map an input batch to class scores of shape `(batch, classes)`.
    fn forward(&self, xs: &Tensor) -> Result<Tensor>;

    /// Return all trainable parameters.
    fn parameters(&self) -> Vec<Var>;
}

/// Holds the model in [`Phase::Validate`] for the duration of an evaluation
/// pass. Only shared access is handed out, so parameters cannot be updated
/// while the guard lives. Dropping it, on success or on error, puts the model
/// back in [`Phase::Train`].
pub(crate) struct EvalGuard<'m, M: LightModule + ?Sized> {
    model: &'m mut M,
}

impl<'m, M: LightModule + ?Sized> EvalGuard<'m, M> {
    pub(crate) fn enter(model: &'m mut M) -> Self {
        model.set_phase(Phase::Validate);
        Self { model }
    }
}

impl<M: LightModule + ?Sized> Deref for EvalGuard<'_, M> {
    type Target = M;

    fn deref(&self) -> &M {
        self.model
    }
}

impl<M: LightModule + ?Sized> Drop for EvalGuard<'_, M> {
    fn drop(&mut self) {
        self.model.set_phase(Phase::Train);
    }
}
