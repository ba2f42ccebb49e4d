use std::path::PathBuf;

use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::data::preprocess::load_file;
use crate::data::source::{epoch_order, Batch, DatasetSource, SourceOptions};
use crate::error::{FoodError, Result};
use crate::math::tensor::{ImageTensor, TensorBatch};

/// Source that decodes every image up front and serves batches from memory.
pub struct EagerSource {
    class_names: Vec<String>,
    images: Vec<ImageTensor>,
    labels: Vec<usize>,
    options: SourceOptions,
    rng: StdRng,
    order: Vec<usize>,
    cursor: usize,
}

impl EagerSource {
    /// Decodes `samples` in parallel. Files that fail to decode are logged
    /// and left out, so `num_samples` may be lower than `samples.len()`.
    pub fn load(samples: &[(PathBuf, usize)], class_names: Vec<String>, options: SourceOptions) -> Self {
        let size = options.input_size;
        let decoded: Vec<Option<(ImageTensor, usize)>> = samples.par_iter()
            .map(|(path, label)| match load_file(path, size) {
                Ok(img) => Some((img, *label)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable image");
                    None
                }
            })
            .collect();

        let (images, labels): (Vec<_>, Vec<_>) = decoded.into_iter().flatten().unzip();
        info!(loaded = images.len(), skipped = samples.len() - images.len(), "eager dataset ready");
        EagerSource::assemble(images, labels, class_names, options)
    }

    /// Builds a source over already decoded tensors.
    pub fn from_tensors(
        images: Vec<ImageTensor>,
        labels: Vec<usize>,
        class_names: Vec<String>,
        options: SourceOptions,
    ) -> Result<Self> {
        if images.len() != labels.len() {
            return Err(FoodError::shape(format!("{} labels", images.len()), format!("{} labels", labels.len())));
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= class_names.len()) {
            return Err(FoodError::config(format!("label {} outside {} classes", bad, class_names.len())));
        }
        // Rejects mixed shapes once instead of on every batch.
        let images = TensorBatch::new(images)?.into_images();
        Ok(EagerSource::assemble(images, labels, class_names, options))
    }

    fn assemble(images: Vec<ImageTensor>, labels: Vec<usize>, class_names: Vec<String>, options: SourceOptions) -> Self {
        let mut rng = StdRng::seed_from_u64(options.seed);
        let order = epoch_order(images.len(), options.shuffle, &mut rng);
        EagerSource { class_names, images, labels, options, rng, order, cursor: 0 }
    }

    /// Per-class sample counts, indexed by label.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.class_names.len()];
        for &l in &self.labels {
            counts[l] += 1;
        }
        counts
    }
}

impl DatasetSource for EagerSource {
    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn num_samples(&self) -> usize {
        self.images.len()
    }

    fn reset(&mut self) {
        self.order = epoch_order(self.images.len(), self.options.shuffle, &mut self.rng);
        self.cursor = 0;
    }

    fn next_batch(&mut self) -> Option<Batch> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.options.batch_size.max(1)).min(self.order.len());
        let picked = &self.order[self.cursor..end];
        self.cursor = end;

        let n = self.class_names.len();
        let images = picked.iter().map(|&i| self.images[i].clone()).collect();
        let labels = picked.iter().map(|&i| one_hot(self.labels[i], n)).collect();
        match TensorBatch::new(images) {
            Ok(images) => Some(Batch { images, labels }),
            Err(e) => {
                warn!(error = %e, "dropping malformed batch");
                self.next_batch()
            }
        }
    }
}

pub(crate) fn one_hot(label: usize, n: usize) -> Vec<f64> {
    let mut v = vec![0.0; n];
    if let Some(slot) = v.get_mut(label) {
        *slot = 1.0;
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensors(n: usize) -> Vec<ImageTensor> {
        (0..n).map(|i| ImageTensor::new(2, 2, 3, vec![i as f32 / n as f32; 12]).unwrap()).collect()
    }

    #[test]
    fn batches_cover_epoch_once() {
        let options = SourceOptions { batch_size: 3, shuffle: true, ..SourceOptions::default() };
        let mut source = EagerSource::from_tensors(tensors(7), vec![0, 1, 0, 1, 0, 1, 0], vec!["a".into(), "b".into()], options).unwrap();

        for _ in 0..2 {
            source.reset();
            let mut sizes = Vec::new();
            let mut ones = 0.0;
            while let Some(batch) = source.next_batch() {
                sizes.push(batch.len());
                assert_eq!(batch.images.len(), batch.labels.len());
                ones += batch.labels.iter().map(|l| l[1]).sum::<f64>();
            }
            assert_eq!(sizes, vec![3, 3, 1]);
            assert_eq!(ones, 3.0);
        }
        assert_eq!(source.class_counts(), vec![4, 3]);
    }

    #[test]
    fn unshuffled_source_keeps_order() {
        let options = SourceOptions { batch_size: 10, shuffle: false, ..SourceOptions::default() };
        let images = tensors(4);
        let mut source = EagerSource::from_tensors(images.clone(), vec![0, 0, 1, 1], vec!["a".into(), "b".into()], options).unwrap();
        let batch = source.next_batch().unwrap();
        assert_eq!(batch.images.images(), &images[..]);
        assert!(source.next_batch().is_none());
    }

    #[test]
    fn rejects_out_of_range_labels() {
        let result = EagerSource::from_tensors(tensors(1), vec![2], vec!["a".into(), "b".into()], SourceOptions::default());
        assert!(result.is_err());
    }
}
