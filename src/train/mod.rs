pub mod callbacks;
pub mod epoch_stats;
pub mod evaluate;
pub mod history;
pub mod loop_fn;
pub mod train_config;

pub use callbacks::{EarlyStopping, ReduceOnPlateau};
pub use epoch_stats::EpochStats;
pub use evaluate::{evaluate, ConfusionMatrix, Evaluation};
pub use history::TrainingRun;
pub use loop_fn::train;
pub use train_config::{CheckpointPaths, EarlyStoppingConfig, PlateauConfig, TrainConfig, TrainingSettings};
