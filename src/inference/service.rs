use std::sync::{Arc, RwLock};

use serde::{Serialize, Deserialize};
use tracing::{debug, error, info};

use crate::data::preprocess::{preprocess_bytes, INPUT_SIZE};
use crate::data::taxonomy::FallbackClasses;
use crate::error::{FoodError, Result};
use crate::inference::context::{ArtifactPaths, InferenceContext};
use crate::loss::cross_entropy::argmax;

/// Label returned when no model is loaded.
pub const MODEL_NOT_LOADED: &str = "modelo_no_cargado";

/// Label returned when the predicted index has no class name.
pub const UNKNOWN_CLASS: &str = "desconocido";

/// Top class of one image and its probability in percent, rounded to two
/// decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub confidence: f64,
}

impl Prediction {
    /// The fixed answer given while the service has no model.
    pub fn model_not_loaded() -> Self {
        Prediction { class: MODEL_NOT_LOADED.to_owned(), confidence: 0.0 }
    }

    pub fn is_model_not_loaded(&self) -> bool {
        self.class == MODEL_NOT_LOADED
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ServiceStatus {
    Ready,
    /// Serving, but with fallback class names.
    Degraded(String),
    /// No model; every classification returns the sentinel.
    Unavailable(String),
}

impl ServiceStatus {
    fn of(context: &std::result::Result<Arc<InferenceContext>, String>) -> Self {
        match context {
            Ok(ctx) => match &ctx.fallback_reason {
                Some(reason) => ServiceStatus::Degraded(reason.clone()),
                None => ServiceStatus::Ready,
            },
            Err(reason) => ServiceStatus::Unavailable(reason.clone()),
        }
    }
}

/// Classifies uploaded images with a model loaded once and shared by every
/// request.
///
/// The loaded context sits behind `RwLock<Arc<..>>`: a request clones the
/// `Arc` and releases the lock before any work, and `reload` swaps in a new
/// context without disturbing requests already running on the old one.
pub struct InferenceService {
    paths: ArtifactPaths,
    fallback: FallbackClasses,
    context: RwLock<std::result::Result<Arc<InferenceContext>, String>>,
}

impl InferenceService {
    /// Loads artifacts from `paths`. Load failures do not fail construction:
    /// the service starts unavailable and answers with the sentinel.
    pub fn start(paths: ArtifactPaths, fallback: FallbackClasses) -> Self {
        let context = Self::build(&paths, &fallback);
        let service = InferenceService { paths, fallback, context: RwLock::new(context) };
        info!(status = ?service.status(), "inference service started");
        service
    }

    /// Service around an already loaded context.
    pub fn from_context(context: InferenceContext) -> Self {
        InferenceService {
            paths: ArtifactPaths::default(),
            fallback: FallbackClasses::None,
            context: RwLock::new(Ok(Arc::new(context))),
        }
    }

    fn build(paths: &ArtifactPaths, fallback: &FallbackClasses) -> std::result::Result<Arc<InferenceContext>, String> {
        InferenceContext::load(paths, fallback).map(Arc::new).map_err(|e| {
            error!(error = %e, path = %paths.model.display(), "model unavailable");
            e.to_string()
        })
    }

    fn current(&self) -> std::result::Result<Arc<InferenceContext>, String> {
        self.context.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::of(&self.current())
    }

    /// `None` while no model is loaded.
    pub fn backbone_pretrained(&self) -> Option<bool> {
        self.current().ok().map(|ctx| ctx.is_pretrained())
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Re-reads the artifacts and swaps the new context in.
    pub fn reload(&self) -> ServiceStatus {
        let context = Self::build(&self.paths, &self.fallback);
        let status = ServiceStatus::of(&context);
        *self.context.write().unwrap_or_else(|e| e.into_inner()) = context;
        info!(status = ?status, "inference context reloaded");
        status
    }

    /// Top class and confidence for one encoded image.
    ///
    /// The image is decoded before model availability is checked, so an
    /// undecodable payload is reported as such even without a model.
    pub fn classify(&self, bytes: &[u8]) -> Result<Prediction> {
        let context = self.current();
        let size = context.as_ref().map(|c| c.input_size()).unwrap_or(INPUT_SIZE);
        let batch = preprocess_bytes(bytes, size)?;

        let context = match context {
            Ok(ctx) => ctx,
            Err(_) => return Ok(Prediction::model_not_loaded()),
        };

        let probabilities = context.model.predict_batch(&batch)?
            .into_iter()
            .next()
            .ok_or_else(|| FoodError::shape("one prediction", "none"))?;
        let index = argmax(&probabilities);
        let confidence = probabilities.get(index).copied().unwrap_or(0.0);
        let class = context.taxonomy.name(index).unwrap_or(UNKNOWN_CLASS).to_owned();
        debug!(class = %class, confidence, "classified image");

        Ok(Prediction { class, confidence: round_percent(confidence) })
    }
}

/// Probability in [0, 1] as a percentage with two decimals.
pub fn round_percent(probability: f64) -> f64 {
    (probability * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::taxonomy::ClassTaxonomy;
    use crate::network::backbone::{BackboneSpec, StageSpec};
    use crate::network::model::Model;
    use crate::network::spec::{HeadSpec, ModelSpec};
    use image::{ImageOutputFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn png() -> Vec<u8> {
        let img = RgbImage::from_fn(50, 40, |x, y| Rgb([x as u8 * 5, y as u8 * 6, 128]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    fn model_spec() -> ModelSpec {
        ModelSpec {
            backbone: BackboneSpec::plain(224, vec![StageSpec { filters: 4, stride: 8 }]),
            head: HeadSpec { hidden_units: vec![8], ..HeadSpec::default() },
            ..ModelSpec::default()
        }
    }

    fn model(outputs: usize) -> Model {
        let model_names: Vec<String> = (0..outputs).map(|i| format!("c{}", i)).collect();
        model_spec().build(&ClassTaxonomy::new(model_names).unwrap()).unwrap()
    }

    fn service(names: &[&str], outputs: usize) -> InferenceService {
        let model = model(outputs);
        let taxonomy = ClassTaxonomy::new(names.iter().map(|s| s.to_string()).collect()).unwrap();
        InferenceService::from_context(InferenceContext::new(model, taxonomy))
    }

    #[test]
    fn classification_is_idempotent() {
        let svc = service(&["Apple 10", "Banana 1", "Orange 1"], 3);
        let bytes = png();
        let first = svc.classify(&bytes).unwrap();
        assert_eq!(svc.classify(&bytes).unwrap(), first);
        assert!(["Apple 10", "Banana 1", "Orange 1"].contains(&first.class.as_str()));
        assert!((0.0..=100.0).contains(&first.confidence));
        assert_eq!(first.confidence, round_percent(first.confidence / 100.0));
    }

    #[test]
    fn missing_names_map_to_unknown() {
        // A one-name taxonomy with a 4-way model whose output 3 dominates.
        let mut model = model(4);
        if let Some(last) = model.head.last_mut() {
            last.biases.as_mut_slice()[3] = 50.0;
        }
        let taxonomy = ClassTaxonomy::new(vec!["only".into()]).unwrap();
        let svc = InferenceService::from_context(InferenceContext::new(model, taxonomy));

        let p = svc.classify(&png()).unwrap();
        assert_eq!(p.class, UNKNOWN_CLASS);
        assert!(p.confidence > 99.0);
    }

    #[test]
    fn seeded_backbone_is_reported() {
        let svc = service(&["a", "b"], 2);
        assert_eq!(svc.backbone_pretrained(), Some(false));
    }

    #[test]
    fn no_model_gives_sentinel_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths { model: dir.path().join("none.json"), classes: dir.path().join("none.txt") };
        let svc = InferenceService::start(paths, FallbackClasses::Produce);
        assert!(matches!(svc.status(), ServiceStatus::Unavailable(_)));
        assert_eq!(svc.backbone_pretrained(), None);
        assert_eq!(svc.classify(&png()).unwrap(), Prediction { class: MODEL_NOT_LOADED.into(), confidence: 0.0 });
        // Bad bytes are still reported as bad bytes.
        assert!(svc.classify(b"garbage").unwrap_err().is_client_error());
    }

    #[test]
    fn fallback_names_degrade_and_reload_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths { model: dir.path().join("model.json"), classes: dir.path().join("classes.txt") };
        let names: Vec<String> = ["Apple 10", "Banana 1", "Orange 1", "Tomato 1", "Carrot 1"].iter().map(|s| s.to_string()).collect();
        let taxonomy = ClassTaxonomy::new(names).unwrap();
        model_spec().build(&taxonomy).unwrap().save_json(&paths.model).unwrap();

        let svc = InferenceService::start(paths.clone(), FallbackClasses::Generic);
        assert!(matches!(svc.status(), ServiceStatus::Degraded(_)));
        assert!(!svc.classify(&png()).unwrap().is_model_not_loaded());

        let strict = InferenceService::start(paths.clone(), FallbackClasses::None);
        assert!(matches!(strict.status(), ServiceStatus::Unavailable(_)));

        taxonomy.save(&paths.classes).unwrap();
        assert_eq!(strict.reload(), ServiceStatus::Ready);
        assert!(!strict.classify(&png()).unwrap().is_model_not_loaded());
    }

    #[test]
    fn rounding() {
        assert_eq!(round_percent(0.123456), 12.35);
        assert_eq!(round_percent(1.0), 100.0);
        assert_eq!(round_percent(0.0), 0.0);
    }
}
