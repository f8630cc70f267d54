//! Trainer configuration.

use candle::Device;

pub struct TrainerConfig {
    pub max_epochs: usize,
    /// Device every parameter and batch tensor must live on.
    pub device: Device,
    /// Emit a debug line every `n` batches; `0` disables per-batch logging.
    pub log_every_n_steps: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            max_epochs: 1000,
            device: Device::Cpu,
            log_every_n_steps: 50,
        }
    }
}

impl TrainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_epochs(mut self, epochs: usize) -> Self {
        self.max_epochs = epochs;
        self
    }

    pub fn device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn log_every_n_steps(mut self, n: usize) -> Self {
        self.log_every_n_steps = n;
        self
    }

    pub(crate) fn should_log(&self, batch_idx: usize) -> bool {
        self.log_every_n_steps > 0 && (batch_idx + 1) % self.log_every_n_steps == 0
    }
}
