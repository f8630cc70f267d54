#![allow(dead_code)]

use candle::{DType, Device, Result, Tensor, Var};
use candle_fit::{Batch, LightModule, Phase};
use candle_nn::{Linear, Module};
use std::sync::{Arc, Mutex};

/// Two-feature, two-class linear classifier that records the phase of every
/// forward call and every phase transition.
pub struct LinearClassifier {
    pub w: Var,
    pub b: Var,
    pub phase: Phase,
    pub forward_phases: Arc<Mutex<Vec<Phase>>>,
    pub transitions: Vec<Phase>,
}

impl LinearClassifier {
    pub fn new(device: &Device) -> Result<Self> {
        Ok(Self {
            w: Var::zeros((2, 2), DType::F32, device)?,
            b: Var::zeros(2, DType::F32, device)?,
            phase: Phase::Train,
            forward_phases: Arc::new(Mutex::new(Vec::new())),
            transitions: Vec::new(),
        })
    }
}

impl LightModule for LinearClassifier {
    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.transitions.push(phase);
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.forward_phases.lock().unwrap().push(self.phase);
        xs.matmul(&self.w)?.broadcast_add(&self.b)
    }

    fn parameters(&self) -> Vec<Var> {
        vec![self.w.clone(), self.b.clone()]
    }
}

/// `y = w x + b` regression model with a single output column.
pub struct LinearRegression {
    linear: Linear,
    pub w: Var,
    pub b: Var,
}

impl LinearRegression {
    pub fn new(device: &Device) -> Result<Self> {
        let w = Var::new(&[[0f32, 0.]], device)?;
        let b = Var::new(0f32, device)?;
        let linear = Linear::new(w.as_tensor().clone(), Some(b.as_tensor().clone()));
        Ok(Self { linear, w, b })
    }
}

impl LightModule for LinearRegression {
    fn set_phase(&mut self, _phase: Phase) {}

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.linear.forward(xs)
    }

    fn parameters(&self) -> Vec<Var> {
        vec![self.w.clone(), self.b.clone()]
    }
}

/// Sum of squared errors between the single output column and float labels.
/// Sum-reduced, so reported epoch losses are scaled by the batch size; only
/// the fitted parameters are asserted on.
pub fn squared_error(scores: &Tensor, labels: &Tensor) -> Result<Tensor> {
    scores.squeeze(1)?.sub(labels)?.sqr()?.sum_all()
}

/// Four points on `y = 3x + z - 2`.
pub fn regression_batches(device: &Device) -> Result<Vec<Batch>> {
    let w_gen = Tensor::new(&[[3f32, 1.]], device)?;
    let b_gen = Tensor::new(-2f32, device)?;
    let gen = Linear::new(w_gen, Some(b_gen));
    let xs = Tensor::new(&[[2f32, 1.], [7., 4.], [-4., 12.], [5., 8.]], device)?;
    let ys = gen.forward(&xs)?.squeeze(1)?;
    Ok(vec![Batch::new(xs, ys)])
}

/// Snapshot of every parameter, flattened.
pub fn snapshot(vars: &[Var]) -> Result<Vec<Vec<f32>>> {
    vars.iter()
        .map(|var| var.flatten_all()?.to_vec1::<f32>())
        .collect()
}

pub fn labels(values: &[u32], device: &Device) -> Result<Tensor> {
    Tensor::new(values, device)
}

/// Two-class batches whose first feature is positive for class 0 and the
/// second for class 1.
pub fn separable_batches(device: &Device) -> Result<Vec<Batch>> {
    Ok(vec![
        Batch::new(
            Tensor::new(&[[1f32, 0.], [0., 1.]], device)?,
            labels(&[0, 1], device)?,
        ),
        Batch::new(
            Tensor::new(&[[2f32, 0.], [0., 2.]], device)?,
            labels(&[0, 1], device)?,
        ),
    ])
}
