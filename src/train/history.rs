use std::path::Path;

use serde::{Serialize, Deserialize};

use crate::error::Result;
use crate::train::epoch_stats::EpochStats;

/// Record of one `train` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRun {
    /// One entry per completed epoch, in order.
    pub epochs: Vec<EpochStats>,
    pub best_val_loss: f64,
    /// 1-based epoch that produced `best_val_loss`.
    pub best_epoch: usize,
    pub stopped_early: bool,
    /// The returned head weights are the best epoch's, not the last one's.
    pub restored_best: bool,
    pub final_learning_rate: f64,
}

impl TrainingRun {
    pub fn train_loss(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.train_loss).collect()
    }

    pub fn val_loss(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.val_loss).collect()
    }

    pub fn train_accuracy(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.train_accuracy).collect()
    }

    pub fn val_accuracy(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.val_accuracy).collect()
    }

    pub fn learning_rates(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.learning_rate).collect()
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<TrainingRun> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}
