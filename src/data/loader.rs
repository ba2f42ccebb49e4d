use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Serialize, Deserialize};
use tracing::{info, warn};

use crate::data::augment::Augmentation;
use crate::data::discovery::{collect_samples, list_class_dirs, select_classes};
use crate::data::eager::EagerSource;
use crate::data::generator::GeneratorSource;
use crate::data::preprocess::INPUT_SIZE;
use crate::data::source::{DatasetSource, SourceOptions};
use crate::data::taxonomy::ClassTaxonomy;
use crate::error::{FoodError, Result};

/// How images are brought into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingMode {
    /// Decode everything once before training.
    Eager,
    /// Decode each batch on demand, with augmentation on the training split.
    Generator,
}

/// Where validation samples come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationSource {
    /// A `Validation/` directory next to `Training/`; missing is fatal.
    Directory,
    /// A seeded, per-class fraction carved out of the training samples.
    HoldOut { fraction: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub root: PathBuf,
    pub training_dir: String,
    pub validation_dir: String,
    pub test_dir: String,
    /// Case-insensitive substrings selecting class folders; empty keeps all.
    pub keywords: Vec<String>,
    pub max_classes: usize,
    pub batch_size: usize,
    pub input_size: u32,
    pub loading: LoadingMode,
    pub validation: ValidationSource,
    pub augmentation: Augmentation,
    /// Batches decoded ahead by generator sources; `0` disables prefetch.
    pub prefetch: usize,
    pub seed: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            root: PathBuf::from("dataset"),
            training_dir: "Training".into(),
            validation_dir: "Validation".into(),
            test_dir: "Test".into(),
            keywords: Vec::new(),
            max_classes: 20,
            batch_size: 32,
            input_size: INPUT_SIZE,
            loading: LoadingMode::Generator,
            validation: ValidationSource::Directory,
            augmentation: Augmentation::default(),
            prefetch: 2,
            seed: 42,
        }
    }
}

/// The three splits of a dataset, sharing one class taxonomy.
pub struct DatasetSplits {
    pub taxonomy: ClassTaxonomy,
    pub training: Box<dyn DatasetSource>,
    pub validation: Box<dyn DatasetSource>,
    /// Empty when the dataset has no `Test/` directory or it holds no images.
    pub test: Box<dyn DatasetSource>,
}

/// Discovers classes and builds the training, validation and test sources.
pub struct DatasetLoader {
    config: DatasetConfig,
}

impl DatasetLoader {
    pub fn new(config: DatasetConfig) -> Self {
        DatasetLoader { config }
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    fn split_dir(&self, name: &str) -> PathBuf {
        self.config.root.join(name)
    }

    /// Class set from `Training/`, after keyword filtering and truncation.
    pub fn discover_classes(&self) -> Result<ClassTaxonomy> {
        let training = self.split_dir(&self.config.training_dir);
        let available = list_class_dirs(&training)?;
        let chosen = select_classes(&available, &self.config.keywords, self.config.max_classes);
        if chosen.is_empty() {
            return Err(FoodError::config(format!("no class folders selected under {}", training.display())));
        }
        info!(available = available.len(), selected = chosen.len(), "classes discovered");
        ClassTaxonomy::new(chosen)
    }

    pub fn load(&self) -> Result<DatasetSplits> {
        let cfg = &self.config;
        if cfg.batch_size == 0 {
            return Err(FoodError::config("batch size must be positive"));
        }
        let taxonomy = self.discover_classes()?;
        let classes = taxonomy.names();

        let training_root = self.split_dir(&cfg.training_dir);
        let mut training_samples = collect_samples(&training_root, classes)?;

        let validation_samples = match &cfg.validation {
            ValidationSource::Directory => {
                let dir = self.split_dir(&cfg.validation_dir);
                if !dir.is_dir() {
                    return Err(FoodError::config(format!(
                        "validation directory {} not found; configure a hold-out split instead",
                        dir.display()
                    )));
                }
                collect_samples(&dir, classes)?
            }
            ValidationSource::HoldOut { fraction } => {
                let (train, val) = stratified_split(training_samples, *fraction, cfg.seed)?;
                training_samples = train;
                val
            }
        };

        let test_dir = self.split_dir(&cfg.test_dir);
        let test_samples = if test_dir.is_dir() {
            collect_samples(&test_dir, classes)?
        } else {
            info!(dir = %test_dir.display(), "no test split");
            Vec::new()
        };

        info!(
            training = training_samples.len(),
            validation = validation_samples.len(),
            test = test_samples.len(),
            mode = ?cfg.loading,
            "dataset indexed"
        );

        let training = self.source(&training_samples, classes, true)?;
        if training.is_empty() {
            return Err(FoodError::empty("training"));
        }
        let validation = self.source(&validation_samples, classes, false)?;
        if validation.is_empty() {
            return Err(FoodError::empty("validation"));
        }
        let test = self.source(&test_samples, classes, false)?;

        Ok(DatasetSplits { taxonomy, training, validation, test })
    }

    /// The test split alone, labelled with a persisted class list.
    ///
    /// `Training/` and `Validation/` are not read. Test folders chosen by the
    /// configured selection rules must all be in `taxonomy`; classes of the
    /// taxonomy without a test folder contribute no samples. A missing test
    /// directory gives an empty source.
    pub fn load_test(&self, taxonomy: &ClassTaxonomy) -> Result<Box<dyn DatasetSource>> {
        let cfg = &self.config;
        if cfg.batch_size == 0 {
            return Err(FoodError::config("batch size must be positive"));
        }
        let classes = taxonomy.names();
        let test_dir = self.split_dir(&cfg.test_dir);
        if !test_dir.is_dir() {
            info!(dir = %test_dir.display(), "no test split");
            return self.source(&[], classes, false);
        }

        let available = list_class_dirs(&test_dir)?;
        let unknown: Vec<String> = select_classes(&available, &cfg.keywords, cfg.max_classes)
            .into_iter()
            .filter(|name| taxonomy.index_of(name).is_none())
            .collect();
        if !unknown.is_empty() {
            return Err(FoodError::config(format!(
                "test folders {:?} are not in the saved class list",
                unknown
            )));
        }

        let samples = collect_samples(&test_dir, classes)?;
        info!(test = samples.len(), classes = classes.len(), "test split indexed");
        self.source(&samples, classes, false)
    }

    fn source(&self, samples: &[(PathBuf, usize)], classes: &[String], training: bool) -> Result<Box<dyn DatasetSource>> {
        let cfg = &self.config;
        let options = SourceOptions {
            batch_size: cfg.batch_size,
            shuffle: training,
            seed: cfg.seed,
            input_size: cfg.input_size,
        };
        Ok(match cfg.loading {
            LoadingMode::Eager => Box::new(EagerSource::load(samples, classes.to_vec(), options)),
            LoadingMode::Generator => {
                let mut source = GeneratorSource::new(samples.to_vec(), classes.to_vec(), options)
                    .with_prefetch(cfg.prefetch);
                if training {
                    source = source.with_augmentation(cfg.augmentation.clone());
                }
                Box::new(source)
            }
        })
    }
}

/// Moves a seeded fraction of every class into a validation set.
///
/// Samples are grouped by label and each group shuffled with the same seeded
/// RNG; the first `floor(fraction · n)` of each group are held out. The two
/// outputs never share a sample.
pub fn stratified_split(
    samples: Vec<(PathBuf, usize)>,
    fraction: f64,
    seed: u64,
) -> Result<(Vec<(PathBuf, usize)>, Vec<(PathBuf, usize)>)> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(FoodError::config(format!("hold-out fraction {} outside (0, 1)", fraction)));
    }

    let mut by_class: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
    for (path, label) in samples {
        by_class.entry(label).or_default().push(path);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut val = Vec::new();
    for (label, mut paths) in by_class {
        paths.shuffle(&mut rng);
        let held = (paths.len() as f64 * fraction).floor() as usize;
        if held == 0 {
            warn!(label, samples = paths.len(), "class too small to contribute validation samples");
        }
        for (i, path) in paths.into_iter().enumerate() {
            if i < held {
                val.push((path, label));
            } else {
                train.push((path, label));
            }
        }
    }
    Ok((train, val))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::path::Path;

    fn write_class(root: &Path, split: &str, class: &str, count: usize) {
        let dir = root.join(split).join(class);
        std::fs::create_dir_all(&dir).unwrap();
        for i in 0..count {
            RgbImage::from_pixel(8, 8, Rgb([i as u8, 100, 200])).save(dir.join(format!("{}.png", i))).unwrap();
        }
    }

    fn config(root: &Path) -> DatasetConfig {
        DatasetConfig {
            root: root.to_path_buf(),
            batch_size: 4,
            input_size: 16,
            loading: LoadingMode::Eager,
            prefetch: 0,
            ..DatasetConfig::default()
        }
    }

    #[test]
    fn missing_training_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DatasetLoader::new(config(dir.path())).load().err().unwrap();
        assert!(matches!(err, FoodError::Config(_)));
    }

    #[test]
    fn missing_validation_is_fatal_without_hold_out() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "Training", "Apple", 5);
        let err = DatasetLoader::new(config(dir.path())).load().err().unwrap();
        assert!(matches!(err, FoodError::Config(_)));

        let cfg = DatasetConfig { validation: ValidationSource::HoldOut { fraction: 0.2 }, ..config(dir.path()) };
        let splits = DatasetLoader::new(cfg).load().unwrap();
        assert_eq!(splits.training.num_samples(), 4);
        assert_eq!(splits.validation.num_samples(), 1);
        assert!(splits.test.is_empty());
    }

    #[test]
    fn empty_training_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "Training", "Apple", 0);
        write_class(dir.path(), "Validation", "Apple", 2);
        let err = DatasetLoader::new(config(dir.path())).load().err().unwrap();
        assert!(matches!(err, FoodError::EmptyDataset { .. }));
    }

    #[test]
    fn splits_share_training_taxonomy() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "Training", "Banana 1", 3);
        write_class(dir.path(), "Training", "Apple 10", 2);
        write_class(dir.path(), "Validation", "Apple 10", 1);
        write_class(dir.path(), "Validation", "Banana 1", 1);
        write_class(dir.path(), "Validation", "Kiwi 1", 4);
        write_class(dir.path(), "Test", "Banana 1", 2);

        let splits = DatasetLoader::new(config(dir.path())).load().unwrap();
        assert_eq!(splits.taxonomy.names(), &["Apple 10".to_string(), "Banana 1".to_string()]);
        assert_eq!(splits.training.num_samples(), 5);
        assert_eq!(splits.validation.num_samples(), 2);
        assert_eq!(splits.test.num_samples(), 2);
        assert_eq!(splits.validation.class_names(), splits.taxonomy.names());
    }

    #[test]
    fn zero_batch_size_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "Training", "Apple", 2);
        let loader = DatasetLoader::new(DatasetConfig { batch_size: 0, ..config(dir.path()) });
        assert!(matches!(loader.load().err().unwrap(), FoodError::Config(_)));
        let saved = ClassTaxonomy::new(vec!["Apple".into()]).unwrap();
        assert!(matches!(loader.load_test(&saved).err().unwrap(), FoodError::Config(_)));
    }

    #[test]
    fn test_split_follows_saved_class_order() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "Test", "Apple 10", 2);
        write_class(dir.path(), "Test", "Banana 1", 3);
        // No Training/ or Validation/ directories at all.
        let saved = ClassTaxonomy::new(vec!["Banana 1".into(), "Apple 10".into(), "Kiwi 1".into()]).unwrap();

        let mut test = DatasetLoader::new(config(dir.path())).load_test(&saved).unwrap();
        assert_eq!(test.num_samples(), 5);
        assert_eq!(test.class_names(), saved.names());
        test.reset();
        let mut per_class = [0usize; 3];
        while let Some(batch) = test.next_batch() {
            for label in &batch.labels {
                per_class[label.iter().position(|&v| v == 1.0).unwrap()] += 1;
            }
        }
        assert_eq!(per_class, [3, 2, 0]);
    }

    #[test]
    fn test_split_rejects_unknown_classes() {
        let dir = tempfile::tempdir().unwrap();
        write_class(dir.path(), "Test", "Apple 10", 1);
        write_class(dir.path(), "Test", "Cherry 1", 1);
        let saved = ClassTaxonomy::new(vec!["Apple 10".into()]).unwrap();
        let loader = DatasetLoader::new(config(dir.path()));
        assert!(matches!(loader.load_test(&saved), Err(FoodError::Config(_))));

        let empty = tempfile::tempdir().unwrap();
        let test = DatasetLoader::new(config(empty.path())).load_test(&saved).unwrap();
        assert!(test.is_empty());
    }

    #[test]
    fn stratified_split_is_reproducible_and_disjoint() {
        let samples: Vec<_> = (0..20)
            .map(|i| (PathBuf::from(format!("{}.jpg", i)), i % 2))
            .collect();
        let (train_a, val_a) = stratified_split(samples.clone(), 0.2, 9).unwrap();
        let (train_b, val_b) = stratified_split(samples, 0.2, 9).unwrap();
        assert_eq!(val_a, val_b);
        assert_eq!(train_a, train_b);
        assert_eq!(val_a.len(), 4);
        assert_eq!(val_a.iter().filter(|(_, l)| *l == 0).count(), 2);
        assert!(val_a.iter().all(|v| !train_a.contains(v)));
        assert!(stratified_split(Vec::new(), 1.5, 0).is_err());
    }
}
