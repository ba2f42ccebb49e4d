use std::path::PathBuf;

use serde::{Serialize, Deserialize};
use tracing::{info, warn};

use crate::data::taxonomy::{ClassTaxonomy, FallbackClasses};
use crate::error::{FoodError, Result};
use crate::network::model::Model;

/// Locations of the persisted model and its class list. Training writes
/// both; inference reads both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub classes: PathBuf,
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        ArtifactPaths {
            model: PathBuf::from("trained_models/food_model.json"),
            classes: PathBuf::from("trained_models/classes.txt"),
        }
    }
}

/// A loaded model paired with the taxonomy used to name its outputs.
///
/// Immutable once built; the inference service shares it behind an `Arc`.
#[derive(Debug)]
pub struct InferenceContext {
    pub model: Model,
    pub taxonomy: ClassTaxonomy,
    /// Set when the taxonomy came from the configured fallback list rather
    /// than the persisted class file.
    pub fallback_reason: Option<String>,
}

impl InferenceContext {
    pub fn new(model: Model, taxonomy: ClassTaxonomy) -> Self {
        InferenceContext::checked(model, taxonomy, None)
    }

    /// Reads the model and class list from disk.
    ///
    /// A model that cannot be read is an error. An unreadable class list
    /// falls back to `fallback` when one is configured.
    pub fn load(paths: &ArtifactPaths, fallback: &FallbackClasses) -> Result<Self> {
        let model = Model::load_json(&paths.model)?;
        info!(
            path = %paths.model.display(),
            classes = model.num_classes(),
            pretrained = model.is_pretrained(),
            "model loaded"
        );

        match ClassTaxonomy::load(&paths.classes) {
            Ok(taxonomy) => Ok(InferenceContext::checked(model, taxonomy, None)),
            Err(e) => {
                let taxonomy = match fallback.taxonomy() {
                    Some(t) => t?,
                    None => {
                        return Err(FoodError::artifact(format!(
                            "class list {} unavailable: {}",
                            paths.classes.display(),
                            e
                        )))
                    }
                };
                let reason = format!("class list {} unavailable ({}), using fallback names", paths.classes.display(), e);
                warn!("{}", reason);
                Ok(InferenceContext::checked(model, taxonomy, Some(reason)))
            }
        }
    }

    fn checked(model: Model, taxonomy: ClassTaxonomy, fallback_reason: Option<String>) -> Self {
        if taxonomy.len() != model.num_classes() {
            warn!(
                model_outputs = model.num_classes(),
                class_names = taxonomy.len(),
                "class list does not match model outputs; unmatched indices map to the unknown label"
            );
        } else if let Some(labels) = &model.metadata.output_labels {
            if labels.as_slice() != taxonomy.names() {
                warn!("class list differs from the labels stored in the model artifact");
            }
        }
        if !model.is_pretrained() {
            warn!("model was trained on a seeded backbone, not pretrained weights");
        }
        InferenceContext { model, taxonomy, fallback_reason }
    }

    pub fn is_degraded(&self) -> bool {
        self.fallback_reason.is_some()
    }

    /// Whether the model's backbone came from a pretrained checkpoint.
    pub fn is_pretrained(&self) -> bool {
        self.model.is_pretrained()
    }

    pub fn input_size(&self) -> u32 {
        self.model.input_size() as u32
    }
}
