pub mod adam;

pub use adam::Adam;

use crate::{math::matrix::Matrix, layers::dense::Layer};

/// Updates head layer weights from averaged mini-batch gradients.
///
/// `index` identifies the layer so stateful optimizers can keep per-layer
/// buffers. The learning rate is mutable so plateau scheduling can lower it
/// between epochs.
pub trait Optimizer: Send {
    fn step(&mut self, index: usize, layer: &mut Layer, weights_grad: &Matrix, biases_grad: &Matrix);
    fn learning_rate(&self) -> f64;
    fn set_learning_rate(&mut self, lr: f64);
}
