//! Metrics for tracking training progress.

use crate::error::{FitError, Result};
use crate::module::{Phase, StepOutput};
use candle::{DType, Tensor, D};
use serde::{Deserialize, Serialize};
use std::fmt;

pub trait Metric {
    fn update(&mut self, preds: &Tensor, targets: &Tensor) -> candle::Result<()>;
    fn compute(&self) -> f64;
    fn reset(&mut self);
}

/// Count the rows of `scores` whose arg-max equals the matching label.
pub fn correct_predictions(scores: &Tensor, labels: &Tensor) -> candle::Result<usize> {
    let preds = scores.argmax(D::Minus1)?;
    let labels = labels.to_dtype(DType::U32)?;
    let correct = preds
        .eq(&labels)?
        .to_dtype(DType::F32)?
        .sum_all()?
        .to_scalar::<f32>()?;
    Ok(correct as usize)
}

/// Fraction of samples classified correctly.
#[derive(Clone, Debug, Default)]
pub struct Accuracy {
    correct: usize,
    total: usize,
}

impl Accuracy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, correct: usize, total: usize) {
        self.correct += correct;
        self.total += total;
    }

    pub fn correct(&self) -> usize {
        self.correct
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl Metric for Accuracy {
    fn update(&mut self, preds: &Tensor, targets: &Tensor) -> candle::Result<()> {
        let correct = correct_predictions(preds, targets)?;
        self.record(correct, targets.dim(0)?);
        Ok(())
    }

    fn compute(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.correct as f64 / self.total as f64
    }

    fn reset(&mut self) {
        self.correct = 0;
        self.total = 0;
    }
}

/// Per-phase accumulator. The loss sum is weighted by batch size so the
/// finished mean is a per-sample mean even when batch sizes differ.
#[derive(Clone, Debug, Default)]
pub struct RunningStats {
    loss_sum: f64,
    accuracy: Accuracy,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one batch into the accumulator. `loss` is the batch-mean loss;
    /// the returned step reports this batch alone.
    pub fn update(
        &mut self,
        loss: f32,
        scores: &Tensor,
        labels: &Tensor,
    ) -> candle::Result<StepOutput> {
        let correct_before = self.accuracy.correct();
        self.accuracy.update(scores, labels)?;
        let batch_size = labels.dim(0)?;
        self.loss_sum += loss as f64 * batch_size as f64;
        Ok(StepOutput {
            loss,
            batch_size,
            correct: self.accuracy.correct() - correct_before,
        })
    }

    pub fn samples(&self) -> usize {
        self.accuracy.total()
    }

    pub fn finish(&self, phase: Phase) -> Result<PhaseStats> {
        let samples = self.samples();
        if samples == 0 {
            return Err(FitError::EmptyDataset { phase });
        }
        Ok(PhaseStats {
            loss: self.loss_sum / samples as f64,
            accuracy: self.accuracy.compute(),
            samples,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

/// The four numbers reported after every epoch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 0-based.
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

impl EpochMetrics {
    pub fn new(epoch: usize, train: &PhaseStats, val: &PhaseStats) -> Self {
        Self {
            epoch,
            train_loss: train.loss,
            train_accuracy: train.accuracy,
            val_loss: val.loss,
            val_accuracy: val.accuracy,
        }
    }

    /// Look up a metric by the name callbacks monitor it under.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "train_loss" => Some(self.train_loss),
            "train_accuracy" => Some(self.train_accuracy),
            "val_loss" => Some(self.val_loss),
            "val_accuracy" => Some(self.val_accuracy),
            _ => None,
        }
    }
}

impl fmt::Display for EpochMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "epoch {:>3}: train_loss {:.4} train_acc {:.2}% | val_loss {:.4} val_acc {:.2}%",
            self.epoch + 1,
            self.train_loss,
            100.0 * self.train_accuracy,
            self.val_loss,
            100.0 * self.val_accuracy,
        )
    }
}
