pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod data;
pub mod train;
pub mod inference;
pub mod config;
pub mod pipeline;
pub mod error;

// Convenience re-exports
pub use math::matrix::Matrix;
pub use math::tensor::{ImageTensor, TensorBatch};
pub use activation::activation::ActivationFunction;
pub use layers::dense::Layer;
pub use network::{Model, ModelSpec};
pub use loss::cross_entropy::CrossEntropyLoss;
pub use optim::{Adam, Optimizer};
pub use data::{ClassTaxonomy, DatasetLoader, DatasetSource, FallbackClasses};
pub use train::{evaluate, train, EpochStats, Evaluation, TrainConfig, TrainingRun};
pub use inference::{classify_request, InferenceService, Prediction};
pub use config::PipelineConfig;
pub use pipeline::{evaluate_saved, train_from_config, TrainingOutcome};
pub use error::{FoodError, Result};
