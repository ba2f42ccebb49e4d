use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, atomic::AtomicBool};

use serde::{Serialize, Deserialize};

use crate::train::epoch_stats::EpochStats;

/// Stop when validation loss has not improved for `patience` epochs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub patience: usize,
    /// Put the best epoch's head weights back when stopping.
    pub restore_best: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        EarlyStoppingConfig { patience: 5, restore_best: true }
    }
}

/// Multiply the learning rate by `factor` after `patience` epochs without
/// improvement, never going below `min_lr`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateauConfig {
    pub patience: usize,
    pub factor: f64,
    pub min_lr: f64,
    /// Improvements smaller than this do not reset the plateau counter.
    pub min_delta: f64,
}

impl Default for PlateauConfig {
    fn default() -> Self {
        PlateauConfig { patience: 3, factor: 0.5, min_lr: 1e-7, min_delta: 1e-4 }
    }
}

/// Serializable training hyperparameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    pub epochs: usize,
    pub early_stopping: EarlyStoppingConfig,
    pub plateau: PlateauConfig,
    /// Seed for dropout masks.
    pub seed: u64,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        TrainingSettings {
            epochs: 10,
            early_stopping: EarlyStoppingConfig::default(),
            plateau: PlateauConfig::default(),
            seed: 42,
        }
    }
}

/// Where the best model seen so far is written during training.
#[derive(Debug, Clone)]
pub struct CheckpointPaths {
    pub model: PathBuf,
    pub classes: PathBuf,
}

/// Configuration for a `train` run.
///
/// # Fields
/// - `settings`   : epochs, callback policies and the dropout seed
/// - `checkpoint` : optional artifact paths overwritten on every improvement
/// - `progress_tx`: optional channel sender; one `EpochStats` is sent per
///                   completed epoch.  If the receiver is dropped the loop
///                   terminates early (clean shutdown).
/// - `stop_flag`  : optional atomic flag; when set to `true` from another
///                   thread the loop terminates after the current epoch.
pub struct TrainConfig {
    pub settings: TrainingSettings,
    pub checkpoint: Option<CheckpointPaths>,
    pub progress_tx: Option<mpsc::Sender<EpochStats>>,
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl TrainConfig {
    /// Creates a `TrainConfig` with no checkpoint, progress channel or stop flag.
    pub fn new(settings: TrainingSettings) -> Self {
        TrainConfig {
            settings,
            checkpoint: None,
            progress_tx: None,
            stop_flag: None,
        }
    }

    pub fn with_checkpoint(mut self, model: impl Into<PathBuf>, classes: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(CheckpointPaths { model: model.into(), classes: classes.into() });
        self
    }
}
