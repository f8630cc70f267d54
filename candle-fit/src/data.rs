//! Batches and the restartable sequences that produce them.

use crate::error::{FitError, Result};
use candle::Tensor;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// A group of samples processed together: inputs and one class index per
/// sample along the first dimension.
#[derive(Clone, Debug)]
pub struct Batch {
    pub inputs: Tensor,
    pub labels: Tensor,
}

impl Batch {
    pub fn new(inputs: Tensor, labels: Tensor) -> Self {
        Self { inputs, labels }
    }
}

/// A batch sequence that can be replayed once per epoch.
pub trait BatchSource {
    fn batches(&mut self, epoch: usize) -> Result<Box<dyn Iterator<Item = Result<Batch>> + '_>>;
}

impl BatchSource for Vec<Batch> {
    fn batches(&mut self, _epoch: usize) -> Result<Box<dyn Iterator<Item = Result<Batch>> + '_>> {
        Ok(Box::new(self.iter().cloned().map(Ok::<_, FitError>)))
    }
}

/// Slices a pair of sample tensors into batches.
///
/// Without a seed the sample order is the storage order on every epoch. With
/// [`DataLoader::shuffle`] each epoch draws a fresh permutation from a
/// generator seeded by `seed + epoch`, so a run is reproducible.
pub struct DataLoader {
    inputs: Tensor,
    labels: Tensor,
    batch_size: usize,
    seed: Option<u64>,
    drop_last: bool,
}

impl DataLoader {
    pub fn new(inputs: Tensor, labels: Tensor, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(FitError::InvalidConfig("batch_size must be positive".to_string()));
        }
        let n_inputs = inputs.dim(0)?;
        let n_labels = labels.dim(0)?;
        if n_inputs != n_labels {
            return Err(FitError::InvalidConfig(format!(
                "{n_inputs} input samples but {n_labels} labels"
            )));
        }
        Ok(Self {
            inputs,
            labels,
            batch_size,
            seed: None,
            drop_last: false,
        })
    }

    pub fn shuffle(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Skip the trailing batch when it is smaller than `batch_size`.
    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_samples(&self) -> usize {
        self.labels.dims().first().copied().unwrap_or(0)
    }

    /// Number of batches yielded per epoch.
    pub fn len(&self) -> usize {
        let n = self.num_samples();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn permutation(&self, epoch: usize) -> Option<Vec<u32>> {
        let seed = self.seed?;
        let mut order: Vec<u32> = (0..self.num_samples() as u32).collect();
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
        order.shuffle(&mut rng);
        Some(order)
    }
}

impl BatchSource for DataLoader {
    fn batches(&mut self, epoch: usize) -> Result<Box<dyn Iterator<Item = Result<Batch>> + '_>> {
        let n_samples = self.num_samples();
        let batch_size = self.batch_size;
        let index = match self.permutation(epoch) {
            Some(order) => Some(Tensor::from_vec(order, n_samples, self.inputs.device())?),
            None => None,
        };
        let inputs = &self.inputs;
        let labels = &self.labels;

        let iter = (0..self.len()).map(move |i| -> Result<Batch> {
            let start = i * batch_size;
            let len = batch_size.min(n_samples - start);
            let batch = match &index {
                Some(index) => {
                    let idx = index.narrow(0, start, len)?;
                    Batch::new(inputs.index_select(&idx, 0)?, labels.index_select(&idx, 0)?)
                }
                None => Batch::new(inputs.narrow(0, start, len)?, labels.narrow(0, start, len)?),
            };
            Ok(batch)
        });
        Ok(Box::new(iter))
    }
}
