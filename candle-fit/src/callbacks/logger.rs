//! Per-epoch metrics file.

use super::{Callback, EpochMetrics};
use crate::error::Result;
use crate::Trainer;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// `epoch,train_loss,train_accuracy,val_loss,val_accuracy` with a header row.
    #[default]
    Csv,
    /// One serialized [`EpochMetrics`] object per line.
    JsonLines,
}

/// Appends one record per epoch to a file. The file is truncated when a fit
/// starts, and flushed after every record so it can be tailed during a run.
pub struct MetricsLogger {
    path: PathBuf,
    format: LogFormat,
    writer: Option<BufWriter<File>>,
}

impl MetricsLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            format: LogFormat::default(),
            writer: None,
        }
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    fn write_record(&mut self, metrics: &EpochMetrics) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        match self.format {
            LogFormat::Csv => writeln!(
                writer,
                "{},{:.6},{:.6},{:.6},{:.6}",
                metrics.epoch + 1,
                metrics.train_loss,
                metrics.train_accuracy,
                metrics.val_loss,
                metrics.val_accuracy
            )?,
            LogFormat::JsonLines => {
                serde_json::to_writer(&mut *writer, metrics)?;
                writer.write_all(b"\n")?;
            }
        }
        writer.flush()?;
        Ok(())
    }
}

impl Callback for MetricsLogger {
    fn on_fit_start(&mut self, _trainer: &Trainer) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(&self.path)?);
        if self.format == LogFormat::Csv {
            writeln!(writer, "epoch,train_loss,train_accuracy,val_loss,val_accuracy")?;
        }
        self.writer = Some(writer);
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        _trainer: &Trainer,
        _epoch: usize,
        metrics: &EpochMetrics,
    ) -> Result<()> {
        self.write_record(metrics)
    }

    fn on_fit_end(&mut self, _trainer: &Trainer) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}
