//! End-to-end training and evaluation driven by a `PipelineConfig`.

use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::data::loader::DatasetLoader;
use crate::data::taxonomy::ClassTaxonomy;
use crate::error::{FoodError, Result};
use crate::network::model::Model;
use crate::train::evaluate::{evaluate, Evaluation};
use crate::train::history::TrainingRun;
use crate::train::loop_fn::train;
use crate::train::train_config::TrainConfig;

/// Result of `train_from_config`.
pub struct TrainingOutcome {
    /// The head as `train` returned it: the best epoch when restored,
    /// otherwise the last one.
    pub model: Model,
    pub taxonomy: ClassTaxonomy,
    pub run: TrainingRun,
    /// Score of `model` on the test split.
    pub test: Evaluation,
}

/// Loads the dataset, trains a fresh model and scores it on the test split.
///
/// The model artifact and class list are written only by the best-epoch
/// checkpoint inside `train`, so the files on disk always hold the best
/// validation loss even when `restore_best` is off.
pub fn train_from_config(config: &PipelineConfig) -> Result<TrainingOutcome> {
    info!(root = %config.dataset.root.display(), "loading dataset");
    let mut splits = DatasetLoader::new(config.dataset.clone()).load()?;

    let (mut model, mut optimizer) = config.model.compile(&splits.taxonomy)?;
    let train_config = TrainConfig::new(config.training.clone())
        .with_checkpoint(&config.artifacts.model, &config.artifacts.classes);

    let run = train(
        &mut model,
        splits.training.as_mut(),
        splits.validation.as_mut(),
        optimizer.as_mut(),
        &train_config,
    )?;
    if run.best_epoch == 0 {
        return Err(FoodError::artifact("no epoch produced a finite validation loss; nothing was saved"));
    }
    if !run.restored_best && run.epochs.last().map(|e| e.epoch) != Some(run.best_epoch) {
        warn!(
            best_epoch = run.best_epoch,
            "returned head is from the last epoch; the saved artifact holds the best epoch"
        );
    }
    if let Some(path) = &config.history {
        run.save_json(path)?;
    }

    let test = evaluate(&model, splits.test.as_mut())?;
    Ok(TrainingOutcome { model, taxonomy: splits.taxonomy, run, test })
}

/// Scores the saved model on the test split, labelling samples with the
/// saved class list.
pub fn evaluate_saved(config: &PipelineConfig) -> Result<Evaluation> {
    let model = Model::load_json(&config.artifacts.model)?;
    let taxonomy = ClassTaxonomy::load(&config.artifacts.classes)?;
    if taxonomy.len() != model.num_classes() {
        return Err(FoodError::artifact(format!(
            "class list has {} names but the model predicts {} classes",
            taxonomy.len(),
            model.num_classes()
        )));
    }
    if let Some(labels) = &model.metadata.output_labels {
        if labels.as_slice() != taxonomy.names() {
            return Err(FoodError::artifact("class list differs from the labels stored in the model artifact"));
        }
    }

    let mut test = DatasetLoader::new(config.dataset.clone()).load_test(&taxonomy)?;
    evaluate(&model, test.as_mut())
}
