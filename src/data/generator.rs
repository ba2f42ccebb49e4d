use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;

use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::data::augment::Augmentation;
use crate::data::eager::one_hot;
use crate::data::preprocess::load_file;
use crate::data::source::{epoch_order, Batch, DatasetSource, SourceOptions};
use crate::math::tensor::TensorBatch;

/// Everything needed to decode the batches of one epoch, independent of the
/// source so it can move to a prefetch thread.
struct EpochPlan {
    samples: Arc<Vec<(PathBuf, usize)>>,
    order: Vec<usize>,
    seeds: Vec<u64>,
    batch_size: usize,
    num_classes: usize,
    input_size: u32,
    augmentation: Option<Augmentation>,
}

impl EpochPlan {
    fn num_batches(&self) -> usize {
        (self.order.len() + self.batch_size - 1) / self.batch_size
    }

    /// Decodes batch `index` in parallel. Unreadable files are skipped, so
    /// the result may be smaller than `batch_size`; `None` when every file
    /// of the batch failed.
    fn decode(&self, index: usize) -> Option<Batch> {
        let start = index * self.batch_size;
        let end = (start + self.batch_size).min(self.order.len());
        let picked: Vec<(usize, u64)> = self.order[start..end].iter().copied()
            .zip(self.seeds[start..end].iter().copied())
            .collect();

        let decoded: Vec<_> = picked.par_iter()
            .filter_map(|&(i, seed)| {
                let (path, label) = &self.samples[i];
                match load_file(path, self.input_size) {
                    Ok(img) => {
                        let img = match &self.augmentation {
                            Some(aug) => aug.apply(&img, &mut StdRng::seed_from_u64(seed)),
                            None => img,
                        };
                        Some((img, one_hot(*label, self.num_classes)))
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping unreadable image");
                        None
                    }
                }
            })
            .collect();

        if decoded.is_empty() {
            return None;
        }
        let (images, labels): (Vec<_>, Vec<_>) = decoded.into_iter().unzip();
        TensorBatch::new(images).ok().map(|images| Batch { images, labels })
    }
}

enum Cursor {
    /// Decoding happens on the caller's thread; holds the next batch index.
    Inline(EpochPlan, usize),
    /// A producer thread decodes ahead into a bounded channel.
    Prefetch(Receiver<Batch>),
}

/// Lazy source that keeps only `(path, label)` pairs and decodes each batch
/// on demand.
///
/// Training sources typically enable augmentation and shuffling; evaluation
/// sources use neither so predictions line up with file order.
pub struct GeneratorSource {
    class_names: Vec<String>,
    samples: Arc<Vec<(PathBuf, usize)>>,
    options: SourceOptions,
    augmentation: Option<Augmentation>,
    prefetch: usize,
    rng: StdRng,
    cursor: Cursor,
}

impl GeneratorSource {
    pub fn new(samples: Vec<(PathBuf, usize)>, class_names: Vec<String>, options: SourceOptions) -> Self {
        let rng = StdRng::seed_from_u64(options.seed);
        let mut source = GeneratorSource {
            class_names,
            samples: Arc::new(samples),
            options,
            augmentation: None,
            prefetch: 0,
            rng,
            cursor: Cursor::Prefetch(mpsc::sync_channel(0).1),
        };
        source.reset();
        source
    }

    /// Enables random augmentation of every decoded image.
    pub fn with_augmentation(mut self, augmentation: Augmentation) -> Self {
        self.augmentation = (!augmentation.is_identity()).then_some(augmentation);
        self.restart();
        self
    }

    /// Decodes up to `depth` batches ahead on a background thread; `0`
    /// decodes inline.
    pub fn with_prefetch(mut self, depth: usize) -> Self {
        self.prefetch = depth;
        self.restart();
        self
    }

    /// Rewinds the RNG so builder calls do not change the epoch sequence.
    fn restart(&mut self) {
        self.rng = StdRng::seed_from_u64(self.options.seed);
        self.reset();
    }

    fn plan(&mut self) -> EpochPlan {
        let order = epoch_order(self.samples.len(), self.options.shuffle, &mut self.rng);
        let seeds = (0..order.len()).map(|_| self.rng.gen()).collect();
        EpochPlan {
            samples: Arc::clone(&self.samples),
            order,
            seeds,
            batch_size: self.options.batch_size.max(1),
            num_classes: self.class_names.len(),
            input_size: self.options.input_size,
            augmentation: self.augmentation.clone(),
        }
    }
}

impl DatasetSource for GeneratorSource {
    fn class_names(&self) -> &[String] {
        &self.class_names
    }

    fn num_samples(&self) -> usize {
        self.samples.len()
    }

    fn reset(&mut self) {
        let plan = self.plan();
        self.cursor = if self.prefetch == 0 {
            Cursor::Inline(plan, 0)
        } else {
            // Replacing the receiver disconnects any producer still running
            // for the previous epoch; its next send fails and it exits.
            let (tx, rx) = mpsc::sync_channel(self.prefetch);
            thread::spawn(move || {
                for index in 0..plan.num_batches() {
                    if let Some(batch) = plan.decode(index) {
                        if tx.send(batch).is_err() {
                            debug!("prefetch consumer gone, stopping producer");
                            return;
                        }
                    }
                }
            });
            Cursor::Prefetch(rx)
        };
    }

    fn next_batch(&mut self) -> Option<Batch> {
        match &mut self.cursor {
            Cursor::Inline(plan, next) => {
                while *next < plan.num_batches() {
                    let index = *next;
                    *next += 1;
                    if let Some(batch) = plan.decode(index) {
                        return Some(batch);
                    }
                }
                None
            }
            Cursor::Prefetch(rx) => rx.recv().ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    fn write_images(dir: &Path, count: usize, shade: u8) -> Vec<PathBuf> {
        (0..count)
            .map(|i| {
                let path = dir.join(format!("img_{}.png", i));
                RgbImage::from_pixel(12, 12, Rgb([shade, i as u8 * 10, 0])).save(&path).unwrap();
                path
            })
            .collect()
    }

    fn options(shuffle: bool) -> SourceOptions {
        SourceOptions { batch_size: 4, shuffle, seed: 7, input_size: 16 }
    }

    #[test]
    fn corrupt_file_shrinks_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut samples: Vec<_> = write_images(dir.path(), 3, 50).into_iter().map(|p| (p, 0)).collect();
        let bad = dir.path().join("broken.png");
        std::fs::write(&bad, b"not a png").unwrap();
        samples.insert(1, (bad, 0));

        let mut source = GeneratorSource::new(samples, vec!["a".into()], options(false));
        let batch = source.next_batch().unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.images.shape(), [3, 16, 16, 3]);
        assert!(source.next_batch().is_none());
    }

    #[test]
    fn unshuffled_order_is_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_images(&mkdir(dir.path().join("a")), 3, 0);
        let b = write_images(&mkdir(dir.path().join("b")), 3, 255);
        let samples: Vec<_> = a.into_iter().map(|p| (p, 0)).chain(b.into_iter().map(|p| (p, 1))).collect();

        let mut source = GeneratorSource::new(samples, vec!["a".into(), "b".into()], options(false));
        let mut labels = Vec::new();
        while let Some(batch) = source.next_batch() {
            labels.extend(batch.labels.iter().map(|l| l[1] as usize));
        }
        assert_eq!(labels, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn prefetch_yields_same_batches_as_inline() {
        let dir = tempfile::tempdir().unwrap();
        let samples: Vec<_> = write_images(dir.path(), 9, 90).into_iter().map(|p| (p, 0)).collect();

        let collect = |mut source: GeneratorSource| {
            let mut out = Vec::new();
            while let Some(batch) = source.next_batch() {
                out.push(batch.images);
            }
            out
        };
        let inline = collect(GeneratorSource::new(samples.clone(), vec!["a".into()], options(true)));
        let ahead = collect(GeneratorSource::new(samples, vec!["a".into()], options(true)).with_prefetch(2));
        assert_eq!(inline.len(), 3);
        assert_eq!(inline, ahead);
    }

    fn mkdir(path: PathBuf) -> PathBuf {
        std::fs::create_dir_all(&path).unwrap();
        path
    }
}
