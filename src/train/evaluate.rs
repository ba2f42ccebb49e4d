use serde::{Serialize, Deserialize};
use tracing::info;

use crate::data::source::DatasetSource;
use crate::error::Result;
use crate::loss::cross_entropy::{argmax, CrossEntropyLoss};
use crate::network::model::Model;

/// Counts of `(true class, predicted class)` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    /// `counts[truth][predicted]`.
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(labels: Vec<String>) -> Self {
        let n = labels.len();
        ConfusionMatrix { labels, counts: vec![vec![0; n]; n] }
    }

    pub fn record(&mut self, truth: usize, predicted: usize) {
        if let Some(cell) = self.counts.get_mut(truth).and_then(|row| row.get_mut(predicted)) {
            *cell += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    /// Fraction of class `index` predicted correctly; `None` without samples.
    pub fn recall(&self, index: usize) -> Option<f64> {
        let row = self.counts.get(index)?;
        let total: usize = row.iter().sum();
        (total > 0).then(|| row[index] as f64 / total as f64)
    }
}

/// Outcome of scoring a model on a labeled split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Evaluation {
    /// The split had no samples; nothing was computed.
    NoData,
    Scored {
        loss: f64,
        accuracy: f64,
        samples: usize,
        confusion: ConfusionMatrix,
    },
}

impl Evaluation {
    pub fn is_scored(&self) -> bool {
        matches!(self, Evaluation::Scored { .. })
    }

    /// `(loss, accuracy)` for scored evaluations.
    pub fn metrics(&self) -> Option<(f64, f64)> {
        match self {
            Evaluation::NoData => None,
            Evaluation::Scored { loss, accuracy, .. } => Some((*loss, *accuracy)),
        }
    }
}

/// Mean cross-entropy and accuracy of `model` over one full pass of
/// `source`. Dropout is inactive. An empty source yields `NoData`.
pub fn evaluate(model: &Model, source: &mut dyn DatasetSource) -> Result<Evaluation> {
    source.reset();
    let mut confusion = ConfusionMatrix::new(source.class_names().to_vec());
    let mut total_loss = 0.0;
    let mut samples = 0usize;
    let mut correct = 0usize;

    while let Some(batch) = source.next_batch() {
        let probabilities = model.predict_batch(&batch.images)?;
        for (probs, label) in probabilities.iter().zip(&batch.labels) {
            total_loss += CrossEntropyLoss::loss(probs, label);
            let truth = argmax(label);
            let predicted = argmax(probs);
            if truth == predicted {
                correct += 1;
            }
            confusion.record(truth, predicted);
            samples += 1;
        }
    }

    if samples == 0 {
        return Ok(Evaluation::NoData);
    }
    let loss = total_loss / samples as f64;
    let accuracy = correct as f64 / samples as f64;
    info!(samples, loss, accuracy, "evaluation finished");
    Ok(Evaluation::Scored { loss, accuracy, samples, confusion })
}
