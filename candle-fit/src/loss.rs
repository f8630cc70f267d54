//! Loss functions consumed by the trainer.

use candle::{Result, Tensor, D};

/// Differentiable `(scores, labels) -> scalar` objective.
///
/// `scores` has shape `(batch, classes)`, `labels` holds one class index per
/// sample. The scalar must be the mean over the batch's samples: epoch losses
/// weight it by the batch size, so a sum-reduced loss comes out inflated by
/// that size. Closures with the same signature implement the trait.
pub trait LossFn {
    fn loss(&self, scores: &Tensor, labels: &Tensor) -> Result<Tensor>;
}

impl<F> LossFn for F
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    fn loss(&self, scores: &Tensor, labels: &Tensor) -> Result<Tensor> {
        self(scores, labels)
    }
}

/// Softmax cross-entropy over raw class scores.
#[derive(Clone, Copy, Debug, Default)]
pub struct CrossEntropy;

impl LossFn for CrossEntropy {
    fn loss(&self, scores: &Tensor, labels: &Tensor) -> Result<Tensor> {
        candle_nn::loss::cross_entropy(scores, labels)
    }
}

/// Mean squared error between scores and one-hot encoded labels.
#[derive(Clone, Copy, Debug, Default)]
pub struct Mse;

impl LossFn for Mse {
    fn loss(&self, scores: &Tensor, labels: &Tensor) -> Result<Tensor> {
        let classes = scores.dim(D::Minus1)?;
        let targets = candle_nn::encoding::one_hot(labels.clone(), classes, 1f32, 0f32)?
            .to_dtype(scores.dtype())?;
        candle_nn::loss::mse(scores, &targets)
    }
}
