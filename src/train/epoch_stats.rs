use serde::{Serialize, Deserialize};

/// Per-epoch training statistics emitted by `train`.
///
/// When a `progress_tx` channel is configured in `TrainConfig`, the training
/// loop sends one `EpochStats` value at the end of every completed epoch.
/// The same values make up `TrainingRun::epochs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Maximum epochs requested for this run.
    pub total_epochs: usize,
    /// Mean training loss over all samples in this epoch.
    pub train_loss: f64,
    /// Training accuracy as a fraction in [0, 1].
    pub train_accuracy: f64,
    /// Mean validation loss after the epoch's updates.
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Learning rate the epoch's updates were made with.
    pub learning_rate: f64,
    /// True when this epoch set a new best validation loss.
    pub improved: bool,
    /// Wall-clock duration of this single epoch in milliseconds.
    pub elapsed_ms: u64,
}
