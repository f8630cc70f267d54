//! Training loop implementation.

use crate::data::{Batch, BatchSource};
use crate::error::{FitError, Result};
use crate::loss::LossFn;
use crate::metrics::{EpochMetrics, PhaseStats, RunningStats};
use crate::module::{EvalGuard, LightModule, Phase, StepOutput};
use crate::{Callback, TrainerConfig};
use candle::{DType, Device, Tensor};
use candle_nn::Optimizer;

type Callbacks = [Box<dyn Callback>];

pub struct Trainer {
    config: TrainerConfig,
    callbacks: Vec<Box<dyn Callback>>,
    history: Vec<EpochMetrics>,
}

impl Trainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self {
            config,
            callbacks: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn with_callback(mut self, callback: impl Callback + 'static) -> Self {
        self.callbacks.push(Box::new(callback));
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Reports of the epochs completed by the most recent [`Trainer::fit`].
    pub fn history(&self) -> &[EpochMetrics] {
        &self.history
    }

    /// Run `config.max_epochs` epochs of one training pass followed by one
    /// validation pass, returning one report per epoch.
    ///
    /// The run ends early only when a callback asks for it through
    /// [`Callback::should_stop`]. Any error aborts the run at the offending
    /// batch; the epochs finished so far stay available in
    /// [`Trainer::history`].
    pub fn fit<M, L, O, T, V>(
        &mut self,
        model: &mut M,
        loss_fn: &L,
        optimizer: &mut O,
        train_data: &mut T,
        val_data: &mut V,
    ) -> Result<Vec<EpochMetrics>>
    where
        M: LightModule + ?Sized,
        L: LossFn + ?Sized,
        O: Optimizer,
        T: BatchSource + ?Sized,
        V: BatchSource + ?Sized,
    {
        self.history.clear();
        self.with_callbacks(|trainer, callbacks| {
            trainer.run(callbacks, model, loss_fn, optimizer, train_data, val_data)
        })?;
        Ok(self.history.clone())
    }

    /// One training pass over `train_data`.
    pub fn train_epoch<M, L, O, T>(
        &mut self,
        model: &mut M,
        loss_fn: &L,
        optimizer: &mut O,
        train_data: &mut T,
        epoch: usize,
    ) -> Result<PhaseStats>
    where
        M: LightModule + ?Sized,
        L: LossFn + ?Sized,
        O: Optimizer,
        T: BatchSource + ?Sized,
    {
        self.check_parameters(model)?;
        self.with_callbacks(|trainer, callbacks| {
            trainer.train_pass(callbacks, model, loss_fn, optimizer, train_data, epoch)
        })
    }

    /// One validation pass over `val_data`; parameters are left untouched.
    pub fn validate<M, L, V>(
        &mut self,
        model: &mut M,
        loss_fn: &L,
        val_data: &mut V,
        epoch: usize,
    ) -> Result<PhaseStats>
    where
        M: LightModule + ?Sized,
        L: LossFn + ?Sized,
        V: BatchSource + ?Sized,
    {
        self.check_parameters(model)?;
        self.with_callbacks(|trainer, callbacks| {
            trainer.validation_pass(callbacks, model, loss_fn, val_data, epoch)
        })
    }

    // Callbacks receive `&Trainer`, so they are moved out for the duration of
    // a run and put back afterwards, also when the run fails.
    fn with_callbacks<R>(
        &mut self,
        f: impl FnOnce(&mut Self, &mut Callbacks) -> Result<R>,
    ) -> Result<R> {
        let mut callbacks = std::mem::take(&mut self.callbacks);
        let result = f(self, &mut callbacks);
        self.callbacks = callbacks;
        result
    }

    fn run<M, L, O, T, V>(
        &mut self,
        callbacks: &mut Callbacks,
        model: &mut M,
        loss_fn: &L,
        optimizer: &mut O,
        train_data: &mut T,
        val_data: &mut V,
    ) -> Result<()>
    where
        M: LightModule + ?Sized,
        L: LossFn + ?Sized,
        O: Optimizer,
        T: BatchSource + ?Sized,
        V: BatchSource + ?Sized,
    {
        self.check_parameters(model)?;
        tracing::info!(
            max_epochs = self.config.max_epochs,
            learning_rate = optimizer.learning_rate(),
            "starting fit"
        );

        for callback in callbacks.iter_mut() {
            callback.on_fit_start(self)?;
        }

        for epoch in 0..self.config.max_epochs {
            let span = tracing::info_span!("epoch", epoch = epoch + 1);
            let _enter = span.enter();

            for callback in callbacks.iter_mut() {
                callback.on_epoch_start(self, epoch)?;
            }

            let train = self.train_pass(callbacks, model, loss_fn, optimizer, train_data, epoch)?;
            let val = self.validation_pass(callbacks, model, loss_fn, val_data, epoch)?;

            let metrics = EpochMetrics::new(epoch, &train, &val);
            tracing::info!(
                train_loss = metrics.train_loss,
                train_accuracy = metrics.train_accuracy,
                val_loss = metrics.val_loss,
                val_accuracy = metrics.val_accuracy,
                "{metrics}"
            );
            self.history.push(metrics.clone());

            for callback in callbacks.iter_mut() {
                callback.on_epoch_end(self, epoch, &metrics)?;
            }

            if callbacks.iter().any(|callback| callback.should_stop()) {
                tracing::info!("stop requested by callback after epoch {}", epoch + 1);
                break;
            }
        }

        for callback in callbacks.iter_mut() {
            callback.on_fit_end(self)?;
        }
        Ok(())
    }

    fn train_pass<M, L, O, T>(
        &self,
        callbacks: &mut Callbacks,
        model: &mut M,
        loss_fn: &L,
        optimizer: &mut O,
        data: &mut T,
        epoch: usize,
    ) -> Result<PhaseStats>
    where
        M: LightModule + ?Sized,
        L: LossFn + ?Sized,
        O: Optimizer,
        T: BatchSource + ?Sized,
    {
        let phase = Phase::Train;
        model.set_phase(phase);
        for callback in callbacks.iter_mut() {
            callback.on_phase_start(self, epoch, phase)?;
        }

        let mut stats = RunningStats::new();
        for (batch_idx, batch) in data.batches(epoch)?.enumerate() {
            let batch = batch?;
            // Zero-sample batches contribute nothing; an all-empty pass still
            // ends in `EmptyDataset`.
            if self.check_batch(&batch, phase, batch_idx)? == 0 {
                continue;
            }

            let scores = model.forward(&batch.inputs)?;
            let loss = loss_fn.loss(&scores, &batch.labels)?;
            let value = finite_loss(&loss, phase, epoch, batch_idx)?;

            // backward() starts from an empty gradient store, nothing carries
            // over from the previous batch.
            let grads = loss.backward()?;
            optimizer.step(&grads)?;

            let output = stats.update(value, &scores.detach(), &batch.labels)?;
            self.finish_step(callbacks, phase, batch_idx, &output)?;
        }

        let stats = stats.finish(phase)?;
        for callback in callbacks.iter_mut() {
            callback.on_phase_end(self, epoch, phase, &stats)?;
        }
        Ok(stats)
    }

    fn validation_pass<M, L, V>(
        &self,
        callbacks: &mut Callbacks,
        model: &mut M,
        loss_fn: &L,
        data: &mut V,
        epoch: usize,
    ) -> Result<PhaseStats>
    where
        M: LightModule + ?Sized,
        L: LossFn + ?Sized,
        V: BatchSource + ?Sized,
    {
        let phase = Phase::Validate;
        let model = EvalGuard::enter(model);
        for callback in callbacks.iter_mut() {
            callback.on_phase_start(self, epoch, phase)?;
        }

        let mut stats = RunningStats::new();
        for (batch_idx, batch) in data.batches(epoch)?.enumerate() {
            let batch = batch?;
            if self.check_batch(&batch, phase, batch_idx)? == 0 {
                continue;
            }

            // Detached scores record no graph for the loss computation.
            let scores = model.forward(&batch.inputs)?.detach();
            let loss = loss_fn.loss(&scores, &batch.labels)?;
            let value = finite_loss(&loss, phase, epoch, batch_idx)?;

            let output = stats.update(value, &scores, &batch.labels)?;
            self.finish_step(callbacks, phase, batch_idx, &output)?;
        }

        let stats = stats.finish(phase)?;
        for callback in callbacks.iter_mut() {
            callback.on_phase_end(self, epoch, phase, &stats)?;
        }
        Ok(stats)
    }

    fn finish_step(
        &self,
        callbacks: &mut Callbacks,
        phase: Phase,
        batch_idx: usize,
        output: &StepOutput,
    ) -> Result<()> {
        if self.config.should_log(batch_idx) {
            tracing::debug!(
                %phase,
                batch = batch_idx + 1,
                loss = output.loss,
                accuracy = output.accuracy(),
                "step"
            );
        }
        for callback in callbacks.iter_mut() {
            callback.on_batch_end(self, phase, batch_idx, output)?;
        }
        Ok(())
    }

    /// Returns the batch size once shapes and placement are known to be sound.
    fn check_batch(&self, batch: &Batch, phase: Phase, batch_idx: usize) -> Result<usize> {
        let inputs = batch.inputs.dims();
        let labels = batch.labels.dims();
        if labels.len() != 1 || inputs.first() != labels.first() {
            return Err(FitError::ShapeMismatch {
                phase,
                batch_idx,
                inputs: inputs.to_vec(),
                labels: labels.to_vec(),
            });
        }
        self.check_device(batch.inputs.device(), || format!("{phase} batch {batch_idx} inputs"))?;
        self.check_device(batch.labels.device(), || format!("{phase} batch {batch_idx} labels"))?;
        Ok(labels[0])
    }

    fn check_parameters<M: LightModule + ?Sized>(&self, model: &M) -> Result<()> {
        for (idx, var) in model.parameters().iter().enumerate() {
            self.check_device(var.device(), || format!("parameter {idx}"))?;
        }
        Ok(())
    }

    fn check_device(&self, found: &Device, what: impl FnOnce() -> String) -> Result<()> {
        if found.same_device(&self.config.device) {
            return Ok(());
        }
        Err(FitError::DeviceMismatch {
            what: what(),
            expected: format!("{:?}", self.config.device.location()),
            found: format!("{:?}", found.location()),
        })
    }
}

fn finite_loss(loss: &Tensor, phase: Phase, epoch: usize, batch_idx: usize) -> Result<f32> {
    let value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
    if !value.is_finite() {
        return Err(FitError::NonFiniteLoss {
            phase,
            epoch,
            batch_idx,
            value,
        });
    }
    Ok(value)
}
