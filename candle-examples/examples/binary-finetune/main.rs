//! Fine-tune the classifier head of a small CNN on a two-class image task.
//!
//! Images are 16x16 grayscale with either a horizontal (class 1) or vertical
//! (class 0) bar under noise. Pass `--backbone weights.safetensors` to start
//! the convolutional layers from pretrained weights named
//! `backbone.c1.weight`, `backbone.c1.bias`, ...

use anyhow::{anyhow, Result};
use candle::{DType, Device, Tensor};
use candle_fit::{
    CrossEntropy, DataLoader, EarlyStopping, LightModule, MetricsLogger, Mode, ModelCheckpoint,
    Phase, Trainer, TrainerConfig,
};
use candle_nn::{Conv2d, Conv2dConfig, Dropout, Linear, ModuleT, Optimizer, VarBuilder, VarMap};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

const LABELS: usize = 2;
const IMAGE_SIZE: usize = 16;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Run on the CPU even when a GPU is available.
    #[arg(long)]
    cpu: bool,

    #[arg(long, default_value_t = 20)]
    epochs: usize,

    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,

    /// Number of generated training images; a quarter as many are held out.
    #[arg(long, default_value_t = 512)]
    samples: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Pretrained backbone weights (safetensors).
    #[arg(long)]
    backbone: Option<PathBuf>,

    /// Also update the backbone instead of training the head alone.
    #[arg(long)]
    train_backbone: bool,

    #[arg(long, default_value_t = 3)]
    patience: usize,

    /// Directory receiving the best checkpoint by validation accuracy.
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// CSV file receiving one row per epoch.
    #[arg(long)]
    metrics: Option<PathBuf>,
}

struct ConvNet {
    conv1: Conv2d,
    conv2: Conv2d,
    head: Linear,
    dropout: Dropout,
    varmap: VarMap,
    phase: Phase,
}

impl ConvNet {
    fn new(dev: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, dev);
        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };
        let backbone = vs.pp("backbone");
        let conv1 = candle_nn::conv2d(1, 8, 3, cfg, backbone.pp("c1"))?;
        let conv2 = candle_nn::conv2d(8, 16, 3, cfg, backbone.pp("c2"))?;
        let features = 16 * (IMAGE_SIZE / 4) * (IMAGE_SIZE / 4);
        let head = candle_nn::linear(features, LABELS, vs.pp("head"))?;
        Ok(Self {
            conv1,
            conv2,
            head,
            dropout: Dropout::new(0.3),
            varmap,
            phase: Phase::Train,
        })
    }

    /// Overwrite backbone variables with the matching tensors of a
    /// safetensors file. Returns how many variables were loaded.
    fn load_backbone(&self, path: &Path, dev: &Device) -> Result<usize> {
        let tensors = candle::safetensors::load(path, dev)?;
        let vars = self.varmap.data().lock().map_err(|e| anyhow!("{e}"))?;
        let mut loaded = 0;
        for (name, tensor) in tensors {
            if !name.starts_with("backbone.") {
                continue;
            }
            if let Some(var) = vars.get(&name) {
                var.set(&tensor)?;
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    fn trainable_vars(&self, train_backbone: bool) -> Result<Vec<candle::Var>> {
        let vars = self.varmap.data().lock().map_err(|e| anyhow!("{e}"))?;
        Ok(vars
            .iter()
            .filter(|(name, _)| train_backbone || name.starts_with("head."))
            .map(|(_, var)| var.clone())
            .collect())
    }
}

impl LightModule for ConvNet {
    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    fn forward(&self, xs: &Tensor) -> candle::Result<Tensor> {
        let xs = xs
            .apply(&self.conv1)?
            .relu()?
            .max_pool2d(2)?
            .apply(&self.conv2)?
            .relu()?
            .max_pool2d(2)?
            .flatten_from(1)?;
        self.dropout
            .forward_t(&xs, self.phase.is_train())?
            .apply(&self.head)
    }

    fn parameters(&self) -> Vec<candle::Var> {
        self.varmap.all_vars()
    }
}

/// Bars are drawn at a random row/column at full intensity over uniform noise.
fn synthetic_images(n: usize, rng: &mut StdRng, dev: &Device) -> Result<(Tensor, Tensor)> {
    let pixels = IMAGE_SIZE * IMAGE_SIZE;
    let mut images = Vec::with_capacity(n * pixels);
    let mut labels = Vec::with_capacity(n);
    for _ in 0..n {
        let label: u32 = rng.random_range(0..LABELS as u32);
        let line = rng.random_range(0..IMAGE_SIZE);
        for row in 0..IMAGE_SIZE {
            for col in 0..IMAGE_SIZE {
                let on_bar = if label == 1 { row == line } else { col == line };
                let noise: f32 = rng.random_range(0.0..0.5);
                images.push(if on_bar { 1.0 } else { noise });
            }
        }
        labels.push(label);
    }
    let images = Tensor::from_vec(images, (n, 1, IMAGE_SIZE, IMAGE_SIZE), dev)?;
    let labels = Tensor::from_vec(labels, n, dev)?;
    Ok((images, labels))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let dev = if args.cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0)?
    };
    println!("Using device: {:?}", dev);

    let mut rng = StdRng::seed_from_u64(args.seed);
    let (train_images, train_labels) = synthetic_images(args.samples, &mut rng, &dev)?;
    let (val_images, val_labels) = synthetic_images((args.samples / 4).max(1), &mut rng, &dev)?;
    println!("train-images: {:?}", train_images.shape());
    println!("val-images: {:?}", val_images.shape());

    let mut model = ConvNet::new(&dev)?;
    if let Some(path) = &args.backbone {
        let loaded = model.load_backbone(path, &dev)?;
        println!("loaded {loaded} backbone tensors from {}", path.display());
    }
    let trainable = model.trainable_vars(args.train_backbone || args.backbone.is_none())?;
    let params = candle_nn::ParamsAdamW {
        lr: args.learning_rate,
        ..Default::default()
    };
    let mut optimizer = candle_nn::AdamW::new(trainable, params)?;

    let mut train_batches =
        DataLoader::new(train_images, train_labels, args.batch_size)?.shuffle(args.seed);
    let mut val_batches = DataLoader::new(val_images, val_labels, args.batch_size)?;

    let config = TrainerConfig::new()
        .max_epochs(args.epochs)
        .device(dev.clone())
        .log_every_n_steps(4);
    let mut trainer = Trainer::new(config).with_callback(
        EarlyStopping::new()
            .monitor("val_loss")
            .patience(args.patience)
            .mode(Mode::Min),
    );
    if let Some(dir) = &args.checkpoint_dir {
        trainer = trainer.with_callback(
            ModelCheckpoint::new(model.varmap.clone(), dir)
                .monitor("val_accuracy")
                .mode(Mode::Max),
        );
    }
    if let Some(path) = &args.metrics {
        trainer = trainer.with_callback(MetricsLogger::new(path));
    }

    let history = trainer.fit(
        &mut model,
        &CrossEntropy,
        &mut optimizer,
        &mut train_batches,
        &mut val_batches,
    )?;

    for metrics in &history {
        println!("{metrics}");
    }
    if let Some(best) = history
        .iter()
        .max_by(|a, b| a.val_accuracy.total_cmp(&b.val_accuracy))
    {
        println!(
            "Best validation accuracy: {:.2}% (epoch {})",
            100.0 * best.val_accuracy,
            best.epoch + 1
        );
    }

    Ok(())
}
