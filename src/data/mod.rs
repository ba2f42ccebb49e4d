pub mod augment;
pub mod discovery;
pub mod eager;
pub mod generator;
pub mod loader;
pub mod preprocess;
pub mod source;
pub mod taxonomy;

pub use augment::Augmentation;
pub use eager::EagerSource;
pub use generator::GeneratorSource;
pub use loader::{DatasetConfig, DatasetLoader, DatasetSplits, LoadingMode, ValidationSource};
pub use source::{Batch, DatasetSource, SourceOptions};
pub use taxonomy::{ClassTaxonomy, FallbackClasses};
