use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::error::{FoodError, Result};
use crate::math::tensor::ImageTensor;

/// Pointwise nonlinearity fused into a convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvActivation {
    /// No activation; used by the projection of an inverted residual block.
    Linear,
    Relu,
    /// `min(max(x, 0), 6)`.
    Relu6,
}

impl ConvActivation {
    fn apply(self, x: f32) -> f32 {
        match self {
            ConvActivation::Linear => x,
            ConvActivation::Relu => x.max(0.0),
            ConvActivation::Relu6 => x.clamp(0.0, 6.0),
        }
    }
}

/// Inference-time batch normalization statistics of one convolution.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm {
    pub gamma: Vec<f32>,
    pub beta: Vec<f32>,
    pub mean: Vec<f32>,
    pub var: Vec<f32>,
    pub eps: f32,
}

fn one() -> usize {
    1
}

/// Square 2-D convolution with "same"-style zero padding (`kernel / 2`)
/// and a fused activation.
///
/// Weights are laid out `[out][ky][kx][in / groups]` so the innermost loop
/// runs over contiguous input channels of one HWC pixel. `groups ==
/// in_channels == out_channels` gives a depthwise convolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    #[serde(default = "one")]
    pub groups: usize,
    pub activation: ConvActivation,
    pub weights: Vec<f32>,
    pub biases: Vec<f32>,
}

impl Conv2d {
    /// He-initialized convolution (fan-in = `kernel² · in_channels / groups`).
    #[allow(clippy::too_many_arguments)]
    pub fn he<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        activation: ConvActivation,
        rng: &mut R,
    ) -> Conv2d {
        let fan_in = kernel_size * kernel_size * (in_channels / groups.max(1));
        let std_dev = (2.0 / fan_in.max(1) as f64).sqrt();
        let weights = (0..out_channels * fan_in)
            .map(|_| {
                let u1: f64 = 1.0 - rng.gen::<f64>();
                let u2: f64 = 1.0 - rng.gen::<f64>();
                let n = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                (n * std_dev) as f32
            })
            .collect();
        Conv2d {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            groups,
            activation,
            weights,
            biases: vec![0.0; out_channels],
        }
    }

    /// Builds a convolution from a PyTorch-layout weight tensor
    /// `[out, in / groups, k, k]`, transposing it to the HWC-friendly layout.
    pub fn from_oihw(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        activation: ConvActivation,
        oihw: &[f32],
    ) -> Result<Conv2d> {
        let in_per_group = in_channels / groups.max(1);
        let k = kernel_size;
        let expected = out_channels * in_per_group * k * k;
        if oihw.len() != expected {
            return Err(FoodError::shape(format!("{} weights", expected), format!("{} weights", oihw.len())));
        }
        let mut weights = vec![0.0f32; expected];
        for o in 0..out_channels {
            for i in 0..in_per_group {
                for ky in 0..k {
                    for kx in 0..k {
                        weights[((o * k + ky) * k + kx) * in_per_group + i] = oihw[((o * in_per_group + i) * k + ky) * k + kx];
                    }
                }
            }
        }
        let conv = Conv2d {
            in_channels,
            out_channels,
            kernel_size,
            stride,
            groups,
            activation,
            weights,
            biases: vec![0.0; out_channels],
        };
        conv.validate()?;
        Ok(conv)
    }

    /// Folds batch normalization into the weights and biases, so inference
    /// needs a single affine pass.
    pub fn fold_batch_norm(&mut self, bn: &BatchNorm) -> Result<()> {
        let n = self.out_channels;
        if [bn.gamma.len(), bn.beta.len(), bn.mean.len(), bn.var.len()].iter().any(|&len| len != n) {
            return Err(FoodError::shape(format!("{} batch-norm channels", n), "mismatched statistics"));
        }
        let per_out = self.weights.len() / n.max(1);
        for o in 0..n {
            let scale = bn.gamma[o] / (bn.var[o] + bn.eps).sqrt();
            for w in &mut self.weights[o * per_out..(o + 1) * per_out] {
                *w *= scale;
            }
            self.biases[o] = (self.biases[o] - bn.mean[o]) * scale + bn.beta[o];
        }
        Ok(())
    }

    pub fn parameter_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    /// Checks that the weight buffers match the declared geometry.
    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 || self.kernel_size == 0 || self.groups == 0 {
            return Err(FoodError::config("convolution stride, kernel size and groups must be positive"));
        }
        if self.in_channels % self.groups != 0 || self.out_channels % self.groups != 0 {
            return Err(FoodError::config(format!(
                "{} groups do not divide {} -> {} channels",
                self.groups, self.in_channels, self.out_channels
            )));
        }
        let expected = self.out_channels * self.kernel_size * self.kernel_size * (self.in_channels / self.groups);
        if self.weights.len() != expected || self.biases.len() != self.out_channels {
            return Err(FoodError::shape(
                format!("{} weights / {} biases", expected, self.out_channels),
                format!("{} weights / {} biases", self.weights.len(), self.biases.len()),
            ));
        }
        Ok(())
    }

    /// Spatial output size for a given input size.
    pub fn output_dim(&self, input: usize) -> usize {
        let pad = self.kernel_size / 2;
        (input + 2 * pad).saturating_sub(self.kernel_size) / self.stride + 1
    }

    pub fn forward(&self, input: &ImageTensor) -> Result<ImageTensor> {
        if input.channels() != self.in_channels {
            return Err(FoodError::shape(
                format!("{} input channels", self.in_channels),
                format!("{} input channels", input.channels()),
            ));
        }

        let (h, w) = (input.height(), input.width());
        let (oh, ow) = (self.output_dim(h), self.output_dim(w));
        let k = self.kernel_size;
        let pad = (k / 2) as isize;
        let in_per_group = self.in_channels / self.groups;
        let out_per_group = self.out_channels / self.groups;
        let mut out = ImageTensor::zeros(oh, ow, self.out_channels);
        let mut acc = vec![0.0f32; self.out_channels];

        for oy in 0..oh {
            for ox in 0..ow {
                acc.copy_from_slice(&self.biases);
                for ky in 0..k {
                    let iy = (oy * self.stride) as isize + ky as isize - pad;
                    if iy < 0 || iy >= h as isize {
                        continue;
                    }
                    for kx in 0..k {
                        let ix = (ox * self.stride) as isize + kx as isize - pad;
                        if ix < 0 || ix >= w as isize {
                            continue;
                        }
                        let px = input.pixel(iy as usize, ix as usize);
                        for (oc, a) in acc.iter_mut().enumerate() {
                            let group = oc / out_per_group;
                            let channels = &px[group * in_per_group..(group + 1) * in_per_group];
                            let base = ((oc * k + ky) * k + kx) * in_per_group;
                            let kernel = &self.weights[base..base + in_per_group];
                            *a += channels.iter().zip(kernel).map(|(p, w)| p * w).sum::<f32>();
                        }
                    }
                }
                for (o, a) in out.pixel_mut(oy, ox).iter_mut().zip(&acc) {
                    *o = self.activation.apply(*a);
                }
            }
        }

        Ok(out)
    }
}

/// Averages every channel over all spatial positions.
pub fn global_average_pool(feature_map: &ImageTensor) -> Vec<f64> {
    let c = feature_map.channels();
    let mut sums = vec![0.0f64; c];
    for px in feature_map.data().chunks_exact(c) {
        for (s, &v) in sums.iter_mut().zip(px) {
            *s += v as f64;
        }
    }
    let n = (feature_map.height() * feature_map.width()).max(1) as f64;
    sums.into_iter().map(|s| s / n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(in_channels: usize, out_channels: usize, kernel_size: usize, stride: usize, groups: usize, weights: Vec<f32>, biases: Vec<f32>) -> Conv2d {
        Conv2d { in_channels, out_channels, kernel_size, stride, groups, activation: ConvActivation::Relu, weights, biases }
    }

    #[test]
    fn stride_two_halves_spatial_size() {
        let conv = conv(3, 2, 3, 2, 1, vec![0.0; 2 * 9 * 3], vec![0.5, -0.5]);
        conv.validate().unwrap();
        let out = conv.forward(&ImageTensor::zeros(224, 224, 3)).unwrap();
        assert_eq!(out.shape(), [112, 112, 2]);
        // Bias passes through; ReLU clamps the negative channel.
        assert_eq!(out.pixel(5, 5), &[0.5, 0.0]);
    }

    #[test]
    fn identity_kernel_copies_input() {
        let mut weights = vec![0.0; 9];
        weights[4] = 1.0; // centre tap
        let conv = conv(1, 1, 3, 1, 1, weights, vec![0.0]);
        let input = ImageTensor::new(2, 2, 1, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        assert_eq!(conv.forward(&input).unwrap(), input);
    }

    #[test]
    fn depthwise_keeps_channels_separate() {
        // 1x1 depthwise: channel 0 doubled, channel 1 negated then clipped.
        let mut dw = conv(2, 2, 1, 1, 2, vec![2.0, -1.0], vec![0.0, 0.0]);
        dw.activation = ConvActivation::Relu6;
        let input = ImageTensor::new(1, 2, 2, vec![1.0, 3.0, 4.0, -2.0]).unwrap();
        let out = dw.forward(&input).unwrap();
        assert_eq!(out.data(), &[2.0, 0.0, 6.0, 2.0]);
    }

    #[test]
    fn pytorch_layout_is_transposed() {
        // [out=1, in=2, 1, 1] stays ordered by input channel.
        let c = Conv2d::from_oihw(2, 1, 1, 1, 1, ConvActivation::Linear, &[0.5, -1.0]).unwrap();
        assert_eq!(c.weights, vec![0.5, -1.0]);

        // [out=1, in=2, 3, 3]: tap (ky=0, kx=1) of input channel 1 sits at
        // oihw index 9 + 1 and lands at hwc index (0*3+1)*2 + 1.
        let mut oihw = vec![0.0; 18];
        oihw[10] = 7.0;
        let c = Conv2d::from_oihw(2, 1, 3, 1, 1, ConvActivation::Linear, &oihw).unwrap();
        assert_eq!(c.weights[3], 7.0);
        assert!(Conv2d::from_oihw(2, 1, 3, 1, 1, ConvActivation::Linear, &oihw[..17]).is_err());
    }

    #[test]
    fn batch_norm_folds_into_affine() {
        let mut c = Conv2d::from_oihw(1, 2, 1, 1, 1, ConvActivation::Linear, &[1.0, 2.0]).unwrap();
        let bn = BatchNorm {
            gamma: vec![2.0, 1.0],
            beta: vec![0.5, 0.0],
            mean: vec![1.0, 0.0],
            var: vec![4.0, 1.0],
            eps: 0.0,
        };
        c.fold_batch_norm(&bn).unwrap();
        let x = 3.0f32;
        let out = c.forward(&ImageTensor::new(1, 1, 1, vec![x]).unwrap()).unwrap();
        // (x * 1 - 1) * 2 / 2 + 0.5 and (x * 2 - 0) * 1 / 1 + 0
        assert!((out.data()[0] - 2.5).abs() < 1e-6);
        assert!((out.data()[1] - 6.0).abs() < 1e-6);
    }

    #[test]
    fn pooling_averages_each_channel() {
        let fm = ImageTensor::new(1, 2, 2, vec![1.0, 4.0, 3.0, 8.0]).unwrap();
        assert_eq!(global_average_pool(&fm), vec![2.0, 6.0]);
    }
}
