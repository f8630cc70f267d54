//! Callback system for training hooks.

mod checkpoint;
mod early_stopping;
mod logger;

pub use checkpoint::ModelCheckpoint;
pub use early_stopping::EarlyStopping;
pub use logger::{LogFormat, MetricsLogger};

pub use crate::metrics::{EpochMetrics, PhaseStats};

use crate::error::Result;
use crate::module::{Phase, StepOutput};
use crate::Trainer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Min,
    Max,
}

impl Mode {
    pub(crate) fn is_better(self, current: f64, best: f64, min_delta: f64) -> bool {
        match self {
            Mode::Min => current < best - min_delta,
            Mode::Max => current > best + min_delta,
        }
    }
}

/// Observer fired by [`Trainer`] at fixed points of a run. Every hook is
/// optional; an error returned from any hook aborts the run.
pub trait Callback: Send {
    fn on_fit_start(&mut self, _trainer: &Trainer) -> Result<()> {
        Ok(())
    }

    fn on_fit_end(&mut self, _trainer: &Trainer) -> Result<()> {
        Ok(())
    }

    fn on_epoch_start(&mut self, _trainer: &Trainer, _epoch: usize) -> Result<()> {
        Ok(())
    }

    fn on_phase_start(&mut self, _trainer: &Trainer, _epoch: usize, _phase: Phase) -> Result<()> {
        Ok(())
    }

    fn on_batch_end(
        &mut self,
        _trainer: &Trainer,
        _phase: Phase,
        _batch_idx: usize,
        _output: &StepOutput,
    ) -> Result<()> {
        Ok(())
    }

    fn on_phase_end(
        &mut self,
        _trainer: &Trainer,
        _epoch: usize,
        _phase: Phase,
        _stats: &PhaseStats,
    ) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _trainer: &Trainer,
        _epoch: usize,
        _metrics: &EpochMetrics,
    ) -> Result<()> {
        Ok(())
    }

    /// Checked after every `on_epoch_end`; `true` ends the run early.
    fn should_stop(&self) -> bool {
        false
    }
}
