use std::sync::atomic::Ordering;
use std::time::Instant;

use rand::{rngs::StdRng, SeedableRng};
use tracing::{info, warn};

use crate::data::source::DatasetSource;
use crate::data::taxonomy::ClassTaxonomy;
use crate::error::{FoodError, Result};
use crate::loss::cross_entropy::{argmax, CrossEntropyLoss};
use crate::math::matrix::Matrix;
use crate::network::model::Model;
use crate::optim::Optimizer;
use crate::train::callbacks::{EarlyStopping, ReduceOnPlateau};
use crate::train::epoch_stats::EpochStats;
use crate::train::evaluate::evaluate;
use crate::train::history::TrainingRun;
use crate::train::train_config::TrainConfig;

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Fits the model head on `training`, scoring `validation` after every epoch.
///
/// # Arguments
/// - `model`     : modified in place; only head weights change
/// - `training`  : shuffled, possibly augmented training stream
/// - `validation`: scored after each epoch to drive the callbacks
/// - `optimizer` : carries the learning rate lowered on plateaus
/// - `config`    : epochs, callbacks, checkpoint paths, progress channel
///
/// # Callbacks
/// After each epoch the validation loss is seen by three independent
/// policies: the best-checkpoint writer, early stopping and the plateau
/// learning-rate schedule.
///
/// # Early termination
/// The loop ends before `epochs` if early stopping fires, the
/// `progress_tx` receiver has been dropped, or `config.stop_flag` is set.
/// Whenever the last epoch is worse than the best one, the best head
/// weights are restored before returning.
///
/// # Errors
/// `EmptyDataset` if either split yields no samples; errors from the
/// backbone forward pass or checkpoint writes are propagated.
pub fn train(
    model: &mut Model,
    training: &mut dyn DatasetSource,
    validation: &mut dyn DatasetSource,
    optimizer: &mut dyn Optimizer,
    config: &TrainConfig,
) -> Result<TrainingRun> {
    let settings = &config.settings;
    if training.num_classes() != model.num_classes() {
        return Err(FoodError::shape(
            format!("{} model outputs", training.num_classes()),
            format!("{} model outputs", model.num_classes()),
        ));
    }
    let taxonomy = ClassTaxonomy::new(training.class_names().to_vec())?;

    let mut rng = StdRng::seed_from_u64(settings.seed);
    let mut early_stopping = EarlyStopping::new(&settings.early_stopping);
    let mut plateau = ReduceOnPlateau::new(&settings.plateau);

    let mut epochs: Vec<EpochStats> = Vec::with_capacity(settings.epochs);
    let mut best_val_loss = f64::INFINITY;
    let mut best_epoch = 0;
    let mut best_head = None;
    let mut stopped_early = false;

    for epoch in 1..=settings.epochs {
        if stop_requested(config) {
            break;
        }

        let t_start = Instant::now();
        let learning_rate = optimizer.learning_rate();

        // ── One full pass over the training data ───────────────────────────
        let (train_loss, train_accuracy) = run_one_epoch(model, training, optimizer, &mut rng)?;

        // ── Validation ────────────────────────────────────────────────────
        let (val_loss, val_accuracy) = evaluate(model, validation)?
            .metrics()
            .ok_or_else(|| FoodError::empty("validation"))?;

        // ── Best checkpoint ───────────────────────────────────────────────
        let improved = val_loss < best_val_loss;
        if improved {
            best_val_loss = val_loss;
            best_epoch = epoch;
            best_head = Some(model.head.clone());
            if let Some(paths) = &config.checkpoint {
                model.save_json(&paths.model)?;
                taxonomy.save(&paths.classes)?;
                info!(epoch, val_loss, path = %paths.model.display(), "checkpoint saved");
            }
        }

        let stats = EpochStats {
            epoch,
            total_epochs: settings.epochs,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy,
            learning_rate,
            improved,
            elapsed_ms: t_start.elapsed().as_millis() as u64,
        };
        info!(
            epoch,
            train_loss,
            train_accuracy,
            val_loss,
            val_accuracy,
            learning_rate,
            "epoch finished"
        );
        epochs.push(stats.clone());

        // ── Emit progress ─────────────────────────────────────────────────
        if let Some(ref tx) = config.progress_tx {
            // If the receiver has been dropped, stop training.
            if tx.send(stats).is_err() {
                warn!("progress receiver dropped, stopping");
                break;
            }
        }

        // ── Early stopping / plateau schedule ─────────────────────────────
        if early_stopping.observe(val_loss) {
            info!(epoch, best_epoch, "early stopping");
            stopped_early = true;
            break;
        }
        if let Some(new_lr) = plateau.observe(val_loss, learning_rate) {
            info!(epoch, from = learning_rate, to = new_lr, "reducing learning rate");
            optimizer.set_learning_rate(new_lr);
        }
    }

    let last_val_loss = epochs.last().map(|e| e.val_loss);
    let mut restored_best = false;
    if let (Some(head), Some(last)) = (best_head, last_val_loss) {
        let restore = if stopped_early { settings.early_stopping.restore_best } else { true };
        // NaN losses count as worse than the best.
        if restore && !(last <= best_val_loss) {
            model.head = head;
            restored_best = true;
            info!(best_epoch, best_val_loss, "restored best weights");
        }
    }

    Ok(TrainingRun {
        epochs,
        best_val_loss,
        best_epoch,
        stopped_early,
        restored_best,
        final_learning_rate: optimizer.learning_rate(),
    })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn stop_requested(config: &TrainConfig) -> bool {
    config.stop_flag.as_ref().map(|f| f.load(Ordering::Relaxed)).unwrap_or(false)
}

/// Runs one full epoch of mini-batch updates over the training source.
/// Returns the mean loss and accuracy over all samples seen.
fn run_one_epoch(
    model: &mut Model,
    training: &mut dyn DatasetSource,
    optimizer: &mut dyn Optimizer,
    rng: &mut StdRng,
) -> Result<(f64, f64)> {
    training.reset();
    let mut total_loss = 0.0;
    let mut correct = 0usize;
    let mut seen = 0usize;

    while let Some(batch) = training.next_batch() {
        if batch.is_empty() {
            continue;
        }
        // Frozen backbone: features only, computed in parallel.
        let features = model.features_batch(batch.images.images())?;

        // Zero-initialize accumulated gradient storage.
        let mut acc_grads: Vec<(Matrix, Matrix)> = model.head.iter()
            .map(|layer| (
                Matrix::zeros(layer.weights.rows, layer.weights.cols),
                Matrix::zeros(layer.biases.rows, layer.biases.cols),
            ))
            .collect();

        // Accumulate gradients over the mini-batch.
        for (feature, expected) in features.iter().zip(&batch.labels) {
            let traces = model.head_forward_train(feature, rng);
            let output = traces.last().map(|t| t.output.as_slice()).unwrap_or(&[]);
            total_loss += CrossEntropyLoss::loss(output, expected);
            if argmax(output) == argmax(expected) {
                correct += 1;
            }
            for ((w_acc, b_acc), (w_grad, b_grad)) in acc_grads.iter_mut().zip(model.head_backward(&traces, expected)) {
                *w_acc += &w_grad;
                *b_acc += &b_grad;
            }
        }

        // Average and apply.
        let inv_batch = 1.0 / batch.len() as f64;
        for (i, (w_acc, b_acc)) in acc_grads.into_iter().enumerate() {
            let w_avg = w_acc.map(|x| x * inv_batch);
            let b_avg = b_acc.map(|x| x * inv_batch);
            optimizer.step(i, &mut model.head[i], &w_avg, &b_avg);
        }
        seen += batch.len();
    }

    if seen == 0 {
        return Err(FoodError::empty("training"));
    }
    Ok((total_loss / seen as f64, correct as f64 / seen as f64))
}
