/// Categorical cross-entropy loss for use with a Softmax output layer.
///
/// Labels are one-hot (mutually exclusive classes).
pub struct CrossEntropyLoss;

/// Small epsilon added inside log() to prevent log(0) = -inf.
const EPS: f64 = 1e-12;

impl CrossEntropyLoss {
    /// L = -sum(expected[i] * log(predicted[i] + eps))
    pub fn loss(predicted: &[f64], expected: &[f64]) -> f64 {
        predicted.iter().zip(expected.iter())
            .map(|(p, e)| -e * (p + EPS).ln())
            .sum()
    }

    /// Gradient of the combined Softmax + cross-entropy w.r.t. the logits:
    ///   ∂L/∂z_i = predicted[i] - expected[i]
    ///
    /// The Softmax layer's own derivative is 1.0 so this is not applied twice.
    pub fn derivative(predicted: &[f64], expected: &[f64]) -> Vec<f64> {
        predicted.iter().zip(expected.iter())
            .map(|(p, e)| p - e)
            .collect()
    }
}

/// Index of the maximum element; ties and NaN resolve to the earlier index.
pub fn argmax(v: &[f64]) -> usize {
    v.iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &x)| match best {
            Some((_, b)) if !(x > b) => best,
            _ if x.is_nan() => best,
            _ => Some((i, x)),
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confident_correct_prediction_has_low_loss() {
        let good = CrossEntropyLoss::loss(&[0.98, 0.01, 0.01], &[1.0, 0.0, 0.0]);
        let bad = CrossEntropyLoss::loss(&[0.01, 0.98, 0.01], &[1.0, 0.0, 0.0]);
        assert!(good < 0.05);
        assert!(bad > 4.0);
    }

    #[test]
    fn argmax_prefers_first_of_ties() {
        assert_eq!(argmax(&[0.2, 0.5, 0.5, 0.1]), 1);
        assert_eq!(argmax(&[f64::NAN, 0.3]), 1);
        assert_eq!(argmax(&[]), 0);
    }
}
