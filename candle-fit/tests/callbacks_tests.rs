mod common;

use anyhow::Result;
use candle::{DType, Device, Tensor};
use candle_fit::{
    Callback, CrossEntropy, EarlyStopping, EpochMetrics, LightModule, LogFormat, MetricsLogger,
    Mode, ModelCheckpoint, Phase, Trainer, TrainerConfig,
};
use candle_nn::{Init, Optimizer, VarMap, SGD};
use common::separable_batches;

/// Linear classifier whose parameters live in a `VarMap`.
struct MappedClassifier {
    varmap: VarMap,
    w: Tensor,
    b: Tensor,
}

impl MappedClassifier {
    fn new(device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let w = varmap.get((2, 2), "w", Init::Const(0.), DType::F32, device)?;
        let b = varmap.get(2, "b", Init::Const(0.), DType::F32, device)?;
        Ok(Self { varmap, w, b })
    }
}

impl LightModule for MappedClassifier {
    fn set_phase(&mut self, _phase: Phase) {}

    fn forward(&self, xs: &Tensor) -> candle::Result<Tensor> {
        xs.matmul(&self.w)?.broadcast_add(&self.b)
    }

    fn parameters(&self) -> Vec<candle::Var> {
        self.varmap.all_vars()
    }
}

fn config(epochs: usize) -> TrainerConfig {
    TrainerConfig::new().max_epochs(epochs).log_every_n_steps(0)
}

#[test]
fn metrics_logger_writes_one_csv_row_per_epoch() -> Result<()> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("logs").join("metrics.csv");

    let mut train = separable_batches(&device)?;
    let mut val = separable_batches(&device)?;
    let mut model = MappedClassifier::new(&device)?;
    let mut optimizer = SGD::new(model.parameters(), 0.1)?;

    let mut trainer = Trainer::new(config(3)).with_callback(MetricsLogger::new(&path));
    trainer.fit(&mut model, &CrossEntropy, &mut optimizer, &mut train, &mut val)?;

    let contents = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "epoch,train_loss,train_accuracy,val_loss,val_accuracy");
    assert!(lines[1].starts_with("1,"));
    assert!(lines[3].starts_with("3,"));
    Ok(())
}

#[test]
fn metrics_logger_json_lines_round_trip() -> Result<()> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("metrics.jsonl");

    let mut train = separable_batches(&device)?;
    let mut val = separable_batches(&device)?;
    let mut model = MappedClassifier::new(&device)?;
    let mut optimizer = SGD::new(model.parameters(), 0.1)?;

    let mut trainer = Trainer::new(config(2))
        .with_callback(MetricsLogger::new(&path).format(LogFormat::JsonLines));
    let history = trainer.fit(&mut model, &CrossEntropy, &mut optimizer, &mut train, &mut val)?;

    let logged = std::fs::read_to_string(&path)?
        .lines()
        .map(serde_json::from_str::<EpochMetrics>)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    assert_eq!(logged.len(), history.len());
    assert_eq!(logged[1].epoch, 1);
    assert!((logged[1].val_loss - history[1].val_loss).abs() < 1e-5);
    Ok(())
}

#[test]
fn checkpoint_keeps_best_files_only() -> Result<()> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;

    let mut train = separable_batches(&device)?;
    let mut val = separable_batches(&device)?;
    let mut model = MappedClassifier::new(&device)?;
    let mut optimizer = SGD::new(model.parameters(), 0.5)?;

    let checkpoint = ModelCheckpoint::new(model.varmap.clone(), dir.path())
        .monitor("val_loss")
        .mode(Mode::Min)
        .save_top_k(2);
    let mut trainer = Trainer::new(config(5)).with_callback(checkpoint);
    trainer.fit(&mut model, &CrossEntropy, &mut optimizer, &mut train, &mut val)?;

    let mut files: Vec<String> = std::fs::read_dir(dir.path())?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    files.sort();
    // Validation loss falls every epoch on separable data, so the last two
    // epochs are the best two.
    assert_eq!(files.len(), 2);
    assert!(files[0].starts_with("epoch_0004_val_loss_"));
    assert!(files[1].starts_with("epoch_0005_val_loss_"));

    // The saved tensors are the trained parameters.
    let mut restored = VarMap::new();
    restored.get((2, 2), "w", Init::Const(0.), DType::F32, &device)?;
    restored.get(2, "b", Init::Const(0.), DType::F32, &device)?;
    restored.load(dir.path().join(&files[1]))?;
    let restored_w = restored.data().lock().unwrap()["w"].flatten_all()?.to_vec1::<f32>()?;
    assert_eq!(restored_w, model.w.flatten_all()?.to_vec1::<f32>()?);
    Ok(())
}

fn val_accuracy_report(epoch: usize, val_accuracy: f64) -> EpochMetrics {
    EpochMetrics {
        epoch,
        train_loss: 1.0,
        train_accuracy: 0.5,
        val_loss: 1.0,
        val_accuracy,
    }
}

#[test]
fn checkpoint_max_mode_prunes_the_lowest_scores() -> Result<()> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let model = MappedClassifier::new(&device)?;
    let trainer = Trainer::new(config(5));

    let mut checkpoint = ModelCheckpoint::new(model.varmap.clone(), dir.path())
        .monitor("val_accuracy")
        .mode(Mode::Max)
        .save_top_k(2);
    assert!(checkpoint.best_path().is_none());

    // Epoch 3 does not beat epoch 2 and is never saved.
    for (epoch, accuracy) in [0.5, 0.75, 0.6, 0.9, 1.0].into_iter().enumerate() {
        checkpoint.on_epoch_end(&trainer, epoch, &val_accuracy_report(epoch, accuracy))?;
    }

    let mut files: Vec<String> = std::fs::read_dir(dir.path())?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<std::io::Result<_>>()?;
    files.sort();
    assert_eq!(
        files,
        vec![
            "epoch_0004_val_accuracy_0.9000.safetensors",
            "epoch_0005_val_accuracy_1.0000.safetensors",
        ]
    );
    assert_eq!(
        checkpoint.best_path(),
        Some(dir.path().join("epoch_0005_val_accuracy_1.0000.safetensors").as_path())
    );
    Ok(())
}

#[test]
fn checkpoint_ignores_an_unknown_metric() -> Result<()> {
    let device = Device::Cpu;
    let dir = tempfile::tempdir()?;
    let target = dir.path().join("checkpoints");
    let model = MappedClassifier::new(&device)?;
    let trainer = Trainer::new(config(1));

    let mut checkpoint = ModelCheckpoint::new(model.varmap.clone(), &target).monitor("val_f1");
    checkpoint.on_epoch_end(&trainer, 0, &val_accuracy_report(0, 1.0))?;

    assert!(checkpoint.best_path().is_none());
    assert!(!target.exists());
    Ok(())
}

#[test]
fn early_stopping_max_mode_respects_min_delta() -> Result<()> {
    let trainer = Trainer::new(config(10));
    let mut early_stopping = EarlyStopping::new()
        .monitor("train_accuracy")
        .mode(Mode::Max)
        .min_delta(0.1)
        .patience(2);
    early_stopping.on_fit_start(&trainer)?;

    let report = |epoch: usize, train_accuracy: f64| EpochMetrics {
        train_accuracy,
        ..val_accuracy_report(epoch, 0.5)
    };
    // 0.55 is within min_delta of 0.5; 0.7 improves on it; 0.75 and 0.78 do not.
    let mut stopped_after = None;
    for (epoch, accuracy) in [0.5, 0.55, 0.7, 0.75, 0.78, 0.9].into_iter().enumerate() {
        early_stopping.on_epoch_end(&trainer, epoch, &report(epoch, accuracy))?;
        if early_stopping.should_stop() {
            stopped_after = Some(epoch);
            break;
        }
    }

    assert_eq!(stopped_after, Some(4));
    assert_eq!(early_stopping.best_metric(), Some(0.7));

    // A new fit starts from scratch.
    early_stopping.on_fit_start(&trainer)?;
    assert!(!early_stopping.should_stop());
    assert_eq!(early_stopping.best_metric(), None);
    Ok(())
}
