//! Early stopping callback.

use super::{Callback, EpochMetrics, Mode};
use crate::error::Result;
use crate::Trainer;

pub struct EarlyStopping {
    monitor: String,
    patience: usize,
    min_delta: f64,
    mode: Mode,
    best_metric: Option<f64>,
    epochs_without_improvement: usize,
    stopped: bool,
}

impl EarlyStopping {
    pub fn new() -> Self {
        Self {
            monitor: "val_loss".to_string(),
            patience: 3,
            min_delta: 0.0,
            mode: Mode::Min,
            best_metric: None,
            epochs_without_improvement: 0,
            stopped: false,
        }
    }

    /// One of `train_loss`, `train_accuracy`, `val_loss`, `val_accuracy`.
    pub fn monitor(mut self, metric: impl Into<String>) -> Self {
        self.monitor = metric.into();
        self
    }

    pub fn patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn min_delta(mut self, delta: f64) -> Self {
        self.min_delta = delta;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn best_metric(&self) -> Option<f64> {
        self.best_metric
    }
}

impl Default for EarlyStopping {
    fn default() -> Self {
        Self::new()
    }
}

impl Callback for EarlyStopping {
    fn on_fit_start(&mut self, _trainer: &Trainer) -> Result<()> {
        self.best_metric = None;
        self.epochs_without_improvement = 0;
        self.stopped = false;
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _trainer: &Trainer,
        epoch: usize,
        metrics: &EpochMetrics,
    ) -> Result<()> {
        let Some(current) = metrics.get(&self.monitor) else {
            tracing::warn!(monitor = %self.monitor, "early stopping monitors an unknown metric");
            return Ok(());
        };

        match self.best_metric {
            Some(best) if !self.mode.is_better(current, best, self.min_delta) => {
                self.epochs_without_improvement += 1;
                if self.epochs_without_improvement >= self.patience {
                    tracing::info!(
                        epoch = epoch + 1,
                        monitor = %self.monitor,
                        best,
                        "no improvement for {} epochs, stopping",
                        self.patience
                    );
                    self.stopped = true;
                }
            }
            _ => {
                self.best_metric = Some(current);
                self.epochs_without_improvement = 0;
            }
        }

        Ok(())
    }

    fn should_stop(&self) -> bool {
        self.stopped
    }
}
