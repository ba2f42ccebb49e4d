use crate::math::tensor::TensorBatch;

/// A mini-batch of images with one-hot targets, in matching order.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: TensorBatch,
    pub labels: Vec<Vec<f64>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// A labeled image stream consumed one epoch at a time.
///
/// `reset` starts a new epoch (reshuffling when the source shuffles);
/// `next_batch` returns `None` once the epoch is exhausted. Batches may be
/// smaller than the configured size when samples fail to decode.
pub trait DatasetSource: Send {
    fn class_names(&self) -> &[String];

    /// Samples per epoch, counting only samples known to be usable.
    fn num_samples(&self) -> usize;

    fn reset(&mut self);

    fn next_batch(&mut self) -> Option<Batch>;

    fn num_classes(&self) -> usize {
        self.class_names().len()
    }

    fn is_empty(&self) -> bool {
        self.num_samples() == 0
    }
}

/// Settings shared by every source implementation.
#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    /// Seed of the per-source RNG driving shuffling and augmentation.
    pub seed: u64,
    /// Square resolution images are resized to.
    pub input_size: u32,
}

impl Default for SourceOptions {
    fn default() -> Self {
        SourceOptions { batch_size: 32, shuffle: true, seed: 42, input_size: crate::data::preprocess::INPUT_SIZE }
    }
}

/// Epoch ordering of sample indices.
pub(crate) fn epoch_order<R: rand::Rng + ?Sized>(n: usize, shuffle: bool, rng: &mut R) -> Vec<usize> {
    use rand::seq::SliceRandom;
    let mut order: Vec<usize> = (0..n).collect();
    if shuffle {
        order.shuffle(rng);
    }
    order
}
