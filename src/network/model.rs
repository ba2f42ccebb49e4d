use std::path::Path;

use rand::Rng;
use rayon::prelude::*;
use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::activation::activation::ActivationFunction;
use crate::error::{FoodError, Result};
use crate::layers::conv::global_average_pool;
use crate::layers::dense::{Layer, LayerTrace};
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::math::matrix::Matrix;
use crate::math::tensor::{ImageTensor, TensorBatch};
use crate::network::backbone::Backbone;
use crate::network::metadata::ModelMetadata;

/// Frozen backbone + global average pooling + trainable dense head.
///
/// The whole struct is the persisted artifact: architecture and weights of
/// both parts serialize together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub backbone: Backbone,
    pub head: Vec<Layer>,
    #[serde(default)]
    pub metadata: ModelMetadata,
}

impl Model {
    /// Width of the softmax output, i.e. the number of classes.
    pub fn num_classes(&self) -> usize {
        self.head.last().map(|l| l.size).unwrap_or(0)
    }

    pub fn input_size(&self) -> usize {
        self.backbone.input_size()
    }

    /// False when the backbone fell back to seeded weights.
    pub fn is_pretrained(&self) -> bool {
        self.backbone.is_pretrained()
    }

    pub fn trainable_parameters(&self) -> usize {
        self.head.iter().map(Layer::parameter_count).sum()
    }

    pub fn frozen_parameters(&self) -> usize {
        self.backbone.parameter_count()
    }

    /// Pooled backbone features for one image.
    pub fn features(&self, image: &ImageTensor) -> Result<Vec<f64>> {
        Ok(global_average_pool(&self.backbone.feature_map(image)?))
    }

    /// Pooled features for many images, computed in parallel. Order matches
    /// the input order.
    pub fn features_batch(&self, images: &[ImageTensor]) -> Result<Vec<Vec<f64>>> {
        images.par_iter().map(|img| self.features(img)).collect()
    }

    /// Head inference pass over pooled features. Returns class probabilities.
    pub fn head_forward(&self, features: &[f64]) -> Vec<f64> {
        let mut current = features.to_vec();
        for layer in &self.head {
            current = layer.forward(&current);
        }
        current
    }

    pub fn predict(&self, image: &ImageTensor) -> Result<Vec<f64>> {
        Ok(self.head_forward(&self.features(image)?))
    }

    /// Probabilities for every image of a `(n, h, w, 3)` batch.
    pub fn predict_batch(&self, batch: &TensorBatch) -> Result<Vec<Vec<f64>>> {
        Ok(self.features_batch(batch.images())?
            .iter()
            .map(|f| self.head_forward(f))
            .collect())
    }

    /// Training forward pass through the head; dropout active.
    pub fn head_forward_train<R: Rng + ?Sized>(&self, features: &[f64], rng: &mut R) -> Vec<LayerTrace> {
        let mut traces: Vec<LayerTrace> = Vec::with_capacity(self.head.len());
        for layer in &self.head {
            let input = traces.last().map(|t| t.output.as_slice()).unwrap_or(features);
            let trace = layer.forward_train(input, rng);
            traces.push(trace);
        }
        traces
    }

    /// Backward pass for one sample. Returns `(weights_grad, biases_grad)` per
    /// head layer. The initial delta is the combined softmax + cross-entropy
    /// gradient.
    pub fn head_backward(&self, traces: &[LayerTrace], expected: &[f64]) -> Vec<(Matrix, Matrix)> {
        let output = traces.last().map(|t| t.output.as_slice()).unwrap_or(&[]);
        let mut delta = CrossEntropyLoss::derivative(output, expected);
        let mut grads = Vec::with_capacity(self.head.len());
        for (layer, trace) in self.head.iter().zip(traces).rev() {
            let (w_grad, b_grad, input_delta) = layer.backward(trace, &delta);
            grads.push((w_grad, b_grad));
            delta = input_delta;
        }
        grads.reverse();
        grads
    }

    /// Checks that the head chains from the backbone features to a softmax.
    pub fn validate(&self) -> Result<()> {
        self.backbone.validate()?;
        let last = self.head.last().ok_or_else(|| FoodError::artifact("model has no head layers"))?;
        if last.activator != ActivationFunction::Softmax {
            return Err(FoodError::artifact("final head layer must use softmax"));
        }
        let mut width = self.backbone.feature_dim();
        for (i, layer) in self.head.iter().enumerate() {
            if layer.input_size() != width || layer.weights.cols != layer.size || layer.biases.cols != layer.size {
                return Err(FoodError::shape(
                    format!("head layer {} fed by {} features", i, width),
                    format!("{}x{} weights", layer.weights.rows, layer.weights.cols),
                ));
            }
            width = layer.size;
        }
        Ok(())
    }

    /// Serializes the model to JSON.
    ///
    /// Writes to a sibling temp file first and renames it into place, so an
    /// existing artifact at `path` is replaced in one step.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        {
            let file = std::fs::File::create(&tmp)?;
            let writer = std::io::BufWriter::new(file);
            serde_json::to_writer(writer, self)?;
        }
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "model artifact written");
        Ok(())
    }

    /// Deserializes and validates a model previously written by `save_json`.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Model> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let model: Model = serde_json::from_reader(reader)?;
        model.validate()?;
        Ok(model)
    }
}
