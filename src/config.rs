use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::data::loader::DatasetConfig;
use crate::data::taxonomy::FallbackClasses;
use crate::error::{FoodError, Result};
use crate::inference::context::ArtifactPaths;
use crate::network::spec::ModelSpec;
use crate::train::train_config::TrainingSettings;

/// Settings of the classification server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub bind: String,
    /// Class names used when the persisted class list cannot be read.
    pub fallback_classes: FallbackClasses,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig { bind: "127.0.0.1:8000".into(), fallback_classes: FallbackClasses::default() }
    }
}

/// Everything the pipeline needs, stored as one JSON document. Missing
/// sections and fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub dataset: DatasetConfig,
    pub model: ModelSpec,
    pub training: TrainingSettings,
    pub artifacts: ArtifactPaths,
    pub service: ServiceConfig,
    /// Where the per-epoch history is written after training.
    pub history: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| FoodError::config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: PipelineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Cross-section consistency checks.
    pub fn validate(&self) -> Result<()> {
        if self.dataset.input_size as usize != self.model.backbone.input_size {
            return Err(FoodError::config(format!(
                "dataset resizes to {} px but the backbone expects {} px",
                self.dataset.input_size, self.model.backbone.input_size
            )));
        }
        if self.dataset.batch_size == 0 {
            return Err(FoodError::config("batch size must be positive"));
        }
        if self.training.epochs == 0 {
            return Err(FoodError::config("epochs must be positive"));
        }
        Ok(())
    }
}
