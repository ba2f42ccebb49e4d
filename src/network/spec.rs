use rand::{rngs::StdRng, SeedableRng};
use serde::{Serialize, Deserialize};
use tracing::{info, warn};

use crate::activation::activation::ActivationFunction;
use crate::data::taxonomy::ClassTaxonomy;
use crate::error::{FoodError, Result};
use crate::layers::dense::Layer;
use crate::network::backbone::{Backbone, BackboneSpec};
use crate::network::metadata::{InputType, ModelMetadata};
use crate::network::model::Model;
use crate::optim::{Adam, Optimizer};

/// Trainable classification head placed after global average pooling.
///
/// Fields:
/// - `hidden_units`: width of each hidden dense layer (one or two layers)
/// - `activation`  : nonlinearity of the hidden layers
/// - `dropout`     : drop probability applied to the input of every dense
///                    layer during training; `0.0` disables it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeadSpec {
    pub hidden_units: Vec<usize>,
    pub activation: ActivationFunction,
    pub dropout: f64,
}

impl Default for HeadSpec {
    fn default() -> Self {
        HeadSpec { hidden_units: vec![256], activation: ActivationFunction::ReLU, dropout: 0.2 }
    }
}

/// Adam settings for the head.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSpec {
    pub learning_rate: f64,
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        OptimizerSpec { learning_rate: 0.001 }
    }
}

impl OptimizerSpec {
    pub fn build(&self) -> Box<dyn Optimizer> {
        Box::new(Adam::new(self.learning_rate))
    }
}

/// A serializable description of the transfer-learning model: frozen
/// backbone, trainable head and the optimizer it is compiled with.
///
/// The loss is always categorical cross-entropy and the metric accuracy,
/// since labels are one-hot over mutually exclusive classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub description: Option<String>,
    pub backbone: BackboneSpec,
    pub head: HeadSpec,
    pub optimizer: OptimizerSpec,
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec {
            description: Some("Produce classifier: frozen MobileNetV2 backbone + dense head".to_owned()),
            backbone: BackboneSpec::default(),
            head: HeadSpec::default(),
            optimizer: OptimizerSpec::default(),
        }
    }
}

impl ModelSpec {
    fn validate(&self, num_classes: usize) -> Result<()> {
        if num_classes == 0 {
            return Err(FoodError::config("cannot build a classifier for zero classes"));
        }
        if self.head.hidden_units.is_empty() || self.head.hidden_units.len() > 2 {
            return Err(FoodError::config("head needs one or two hidden dense layers"));
        }
        if self.head.hidden_units.contains(&0) {
            return Err(FoodError::config("hidden layer width must be positive"));
        }
        if !(0.0..1.0).contains(&self.head.dropout) {
            return Err(FoodError::config(format!("dropout {} outside [0, 1)", self.head.dropout)));
        }
        if self.head.activation == ActivationFunction::Softmax {
            return Err(FoodError::config("softmax is reserved for the output layer"));
        }
        if !(self.optimizer.learning_rate > 0.0) {
            return Err(FoodError::config("learning rate must be positive"));
        }
        Ok(())
    }

    /// Builds an untrained model whose output width equals the taxonomy size.
    pub fn build(&self, taxonomy: &ClassTaxonomy) -> Result<Model> {
        let num_classes = taxonomy.len();
        self.validate(num_classes)?;

        let backbone = Backbone::from_spec(&self.backbone)?;
        // Head weights get their own stream so changing the head never
        // perturbs the backbone.
        let mut rng = StdRng::seed_from_u64(self.backbone.seed.wrapping_add(1));

        let mut head = Vec::with_capacity(self.head.hidden_units.len() + 1);
        let mut input_size = backbone.feature_dim();
        for &units in &self.head.hidden_units {
            head.push(Layer::new(units, input_size, self.head.activation, self.head.dropout, &mut rng));
            input_size = units;
        }
        head.push(Layer::new(num_classes, input_size, ActivationFunction::Softmax, self.head.dropout, &mut rng));

        let input = backbone.input_size() as u32;
        let model = Model {
            backbone,
            head,
            metadata: ModelMetadata {
                description: self.description.clone(),
                input_type: Some(InputType::ImageRgb { width: input, height: input }),
                output_labels: Some(taxonomy.names().to_vec()),
            },
        };

        info!(
            classes = num_classes,
            trainable = model.trainable_parameters(),
            frozen = model.frozen_parameters(),
            pretrained = model.is_pretrained(),
            "model built"
        );
        if !model.is_pretrained() {
            warn!("backbone is not pretrained; the head will train on random features");
        }
        Ok(model)
    }

    /// Builds the model and the optimizer it trains with.
    pub fn compile(&self, taxonomy: &ClassTaxonomy) -> Result<(Model, Box<dyn Optimizer>)> {
        let model = self.build(taxonomy)?;
        Ok((model, self.optimizer.build()))
    }
}
