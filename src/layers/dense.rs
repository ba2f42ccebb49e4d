use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::{math::matrix::Matrix, activation::activation::ActivationFunction};

/// Fully connected head layer with optional dropout on its input.
///
/// Dropout is only active during training (`forward_train`); inference
/// (`forward`) is deterministic and takes `&self`, so a loaded model can be
/// shared between threads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub size: usize,
    pub weights: Matrix, // input_size × size
    pub biases: Matrix,  // 1 × size
    pub activator: ActivationFunction,
    #[serde(default)]
    pub input_dropout: f64,
}

/// Values recorded during a training forward pass, needed for backprop.
#[derive(Debug, Clone)]
pub struct LayerTrace {
    /// Input after the dropout mask was applied.
    pub input: Vec<f64>,
    /// Per-input mask already scaled by `1 / (1 - p)`; `None` without dropout.
    pub mask: Option<Vec<f64>>,
    /// Pre-activation values (z = xW + b).
    pub pre_activation: Vec<f64>,
    pub output: Vec<f64>,
}

impl Layer {
    pub fn new<R: Rng + ?Sized>(
        size: usize,
        input_size: usize,
        activation: ActivationFunction,
        input_dropout: f64,
        rng: &mut R,
    ) -> Layer {
        let weights = if activation.is_rectifier() {
            Matrix::he(input_size, size, rng)
        } else {
            Matrix::xavier(input_size, size, rng)
        };

        Layer {
            size,
            weights,
            biases: Matrix::zeros(1, size),
            activator: activation,
            input_dropout,
        }
    }

    pub fn input_size(&self) -> usize {
        self.weights.rows
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.rows * self.weights.cols + self.biases.cols
    }

    fn pre_activation(&self, input: &[f64]) -> Vec<f64> {
        let mut z = self.weights.vec_mul(input);
        for (v, b) in z.iter_mut().zip(self.biases.as_slice()) {
            *v += b;
        }
        z
    }

    /// Inference forward pass.
    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.activator.activate(&self.pre_activation(input))
    }

    /// Training forward pass with inverted dropout on the input.
    pub fn forward_train<R: Rng + ?Sized>(&self, input: &[f64], rng: &mut R) -> LayerTrace {
        let (input, mask) = if self.input_dropout > 0.0 {
            let keep = 1.0 - self.input_dropout;
            let mask: Vec<f64> = input.iter()
                .map(|_| if rng.gen::<f64>() < keep { 1.0 / keep } else { 0.0 })
                .collect();
            let dropped = input.iter().zip(&mask).map(|(x, m)| x * m).collect();
            (dropped, Some(mask))
        } else {
            (input.to_vec(), None)
        };

        let pre_activation = self.pre_activation(&input);
        let output = self.activator.activate(&pre_activation);
        LayerTrace { input, mask, pre_activation, output }
    }

    /// Computes gradients for one sample. Returns `(weights_grad, biases_grad,
    /// input_delta)`.
    ///
    /// `output_delta` is ∂L/∂a for this layer (error in activation space);
    /// `input_delta` is ∂L/∂x for the layer feeding into this one.
    pub fn backward(&self, trace: &LayerTrace, output_delta: &[f64]) -> (Matrix, Matrix, Vec<f64>) {
        // δ = error ⊙ σ'(z)
        let layer_delta: Vec<f64> = output_delta.iter()
            .zip(&trace.pre_activation)
            .map(|(e, &z)| e * self.activator.derivative(z))
            .collect();

        let weights_grad = Matrix::outer(&trace.input, &layer_delta);
        let mut input_delta = self.weights.mul_vec(&layer_delta);
        if let Some(mask) = &trace.mask {
            for (d, m) in input_delta.iter_mut().zip(mask) {
                *d *= m;
            }
        }

        (weights_grad, Matrix::from_row(layer_delta), input_delta)
    }
}
