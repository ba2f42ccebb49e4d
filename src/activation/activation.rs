use serde::{Serialize, Deserialize};

/// Nonlinearities available to head layers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActivationFunction {
    ReLU,
    /// Vector-valued; applied across the whole layer output by `activate()`.
    Softmax,
}

impl ActivationFunction {
    /// Applies the activation to a full pre-activation vector.
    pub fn activate(&self, z: &[f64]) -> Vec<f64> {
        match self {
            ActivationFunction::Softmax => softmax(z),
            ActivationFunction::ReLU => z.iter().map(|&x| x.max(0.0)).collect(),
        }
    }

    /// Element-wise derivative with respect to the pre-activation.
    ///
    /// For `Softmax` the trainer feeds the combined softmax + cross-entropy
    /// gradient (`predicted - expected`), so the layer passes it through with
    /// a factor of `1.0`.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::Softmax => 1.0,
        }
    }

    /// True for the ReLU family, which prefers He initialization.
    pub fn is_rectifier(&self) -> bool {
        matches!(self, ActivationFunction::ReLU)
    }
}

/// Numerically stable softmax: shifts by the max logit before exponentiating.
pub fn softmax(z: &[f64]) -> Vec<f64> {
    let max = z.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = z.iter().map(|&v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_is_a_distribution_even_for_large_logits() {
        let p = softmax(&[1000.0, 1001.0, 999.0]);
        let sum: f64 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-12);
        assert!(p[1] > p[0] && p[0] > p[2]);
    }

    #[test]
    fn relu_clamps_negatives() {
        assert_eq!(ActivationFunction::ReLU.activate(&[-1.0, 2.0]), vec![0.0, 2.0]);
        assert_eq!(ActivationFunction::ReLU.derivative(-2.0), 0.0);
        assert_eq!(ActivationFunction::ReLU.derivative(3.0), 1.0);
    }
}
