use serde::{Deserialize, Serialize};

/// Describes how raw input must be prepared before it reaches the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InputType {
    /// RGB image resized to width×height, normalized to [0, 1], HWC layout.
    ImageRgb { width: u32, height: u32 },
}

/// Optional annotations attached to a saved model.
/// All fields are Option<> so artifacts without metadata still deserialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub description: Option<String>,
    pub input_type: Option<InputType>,
    /// Class names in output order, as seen at training time.
    ///
    /// The class list file next to the artifact is authoritative; this copy
    /// only lets the loader detect a mismatched pair.
    pub output_labels: Option<Vec<String>>,
}
