pub mod context;
pub mod endpoint;
pub mod multipart;
pub mod service;

pub use context::{ArtifactPaths, InferenceContext};
pub use endpoint::{classify_request, EndpointResponse};
pub use service::{InferenceService, Prediction, ServiceStatus, MODEL_NOT_LOADED, UNKNOWN_CLASS};
