pub mod conv;
pub mod dense;

pub use conv::{global_average_pool, Conv2d};
pub use dense::{Layer, LayerTrace};
