use std::collections::HashMap;

use crate::{math::matrix::Matrix, layers::dense::Layer};
use crate::optim::Optimizer;

/// First/second moment estimates for one layer.
struct Moments {
    m_w: Vec<f64>,
    v_w: Vec<f64>,
    m_b: Vec<f64>,
    v_b: Vec<f64>,
    t: i32,
}

/// Adam with bias correction (β₁ = 0.9, β₂ = 0.999, ε = 1e-7).
///
/// Moment buffers are created lazily per layer index on the first step.
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    state: HashMap<usize, Moments>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Adam {
        Adam { learning_rate, beta1: 0.9, beta2: 0.999, epsilon: 1e-7, state: HashMap::new() }
    }

    fn update(&self, params: &mut [f64], grads: &[f64], m: &mut [f64], v: &mut [f64], t: i32) {
        let correction1 = 1.0 - self.beta1.powi(t);
        let correction2 = 1.0 - self.beta2.powi(t);
        for i in 0..params.len() {
            let g = grads[i];
            m[i] = self.beta1 * m[i] + (1.0 - self.beta1) * g;
            v[i] = self.beta2 * v[i] + (1.0 - self.beta2) * g * g;
            let m_hat = m[i] / correction1;
            let v_hat = v[i] / correction2;
            params[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }
}

impl Optimizer for Adam {
    fn step(&mut self, index: usize, layer: &mut Layer, weights_grad: &Matrix, biases_grad: &Matrix) {
        let mut moments = self.state.remove(&index).unwrap_or_else(|| Moments {
            m_w: vec![0.0; weights_grad.as_slice().len()],
            v_w: vec![0.0; weights_grad.as_slice().len()],
            m_b: vec![0.0; biases_grad.as_slice().len()],
            v_b: vec![0.0; biases_grad.as_slice().len()],
            t: 0,
        });
        moments.t += 1;

        self.update(layer.weights.as_mut_slice(), weights_grad.as_slice(), &mut moments.m_w, &mut moments.v_w, moments.t);
        self.update(layer.biases.as_mut_slice(), biases_grad.as_slice(), &mut moments.m_b, &mut moments.v_b, moments.t);

        self.state.insert(index, moments);
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn first_step_moves_each_weight_by_learning_rate() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut layer = Layer::new(2, 2, ActivationFunction::ReLU, 0.0, &mut rng);
        let before = layer.weights.clone();
        let mut adam = Adam::new(0.01);
        let grads = Matrix::from_vec(2, 2, vec![0.5, -2.0, 1e-3, 4.0]);
        adam.step(0, &mut layer, &grads, &Matrix::zeros(1, 2));

        // With bias correction the first update is lr · sign(g).
        for (i, (&a, &b)) in before.as_slice().iter().zip(layer.weights.as_slice()).enumerate() {
            let expected = -0.01 * grads.as_slice()[i].signum();
            assert!((b - a - expected).abs() < 1e-4, "weight {} moved {}", i, b - a);
        }
    }
}
