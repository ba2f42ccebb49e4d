pub mod backbone;
pub mod metadata;
pub mod model;
pub(crate) mod pretrained;
pub mod spec;

pub use backbone::{Architecture, Backbone, BackboneSpec, Normalization, StageSpec, WeightOrigin};
pub use metadata::{InputType, ModelMetadata};
pub use model::Model;
pub use spec::{HeadSpec, ModelSpec, OptimizerSpec};
