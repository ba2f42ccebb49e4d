use std::ops::AddAssign;

use image::RgbImage;

use crate::error::{FoodError, Result};

/// An image held as `height × width × channels` f32 values (HWC layout).
///
/// Pixel tensors produced by the loaders are RGB, `224 × 224 × 3`, with
/// values scaled to `[0, 1]`. Backbone feature maps reuse the same type with
/// more channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    height: usize,
    width: usize,
    channels: usize,
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn new(height: usize, width: usize, channels: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != height * width * channels {
            return Err(FoodError::shape(
                format!("{} values for {}x{}x{}", height * width * channels, height, width, channels),
                format!("{} values", data.len()),
            ));
        }
        Ok(ImageTensor { height, width, channels, data })
    }

    pub fn zeros(height: usize, width: usize, channels: usize) -> Self {
        ImageTensor { height, width, channels, data: vec![0.0; height * width * channels] }
    }

    /// Converts 8-bit RGB pixels to `[0, 1]` floats.
    pub fn from_rgb(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let data = image.as_raw().iter().map(|&c| c as f32 / 255.0).collect();
        ImageTensor { height: height as usize, width: width as usize, channels: 3, data }
    }

    pub fn height(&self) -> usize { self.height }
    pub fn width(&self) -> usize { self.width }
    pub fn channels(&self) -> usize { self.channels }

    /// `[height, width, channels]`.
    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, self.channels]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Channel values of the pixel at `(y, x)`.
    pub fn pixel(&self, y: usize, x: usize) -> &[f32] {
        let start = (y * self.width + x) * self.channels;
        &self.data[start..start + self.channels]
    }

    pub fn pixel_mut(&mut self, y: usize, x: usize) -> &mut [f32] {
        let start = (y * self.width + x) * self.channels;
        &mut self.data[start..start + self.channels]
    }

    /// Smallest and largest value in the tensor.
    pub fn value_range(&self) -> (f32, f32) {
        self.data.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
    }
}

impl AddAssign<&ImageTensor> for ImageTensor {
    /// Element-wise sum. Shapes must match.
    fn add_assign(&mut self, other: &ImageTensor) {
        assert_eq!(self.shape(), other.shape(), "tensor shapes must match");
        for (a, b) in self.data.iter_mut().zip(&other.data) {
            *a += b;
        }
    }
}

/// A batch of same-shaped image tensors, i.e. a `(n, h, w, c)` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorBatch {
    images: Vec<ImageTensor>,
}

impl TensorBatch {
    pub fn new(images: Vec<ImageTensor>) -> Result<Self> {
        if let Some(first) = images.first() {
            if let Some(odd) = images.iter().find(|t| t.shape() != first.shape()) {
                return Err(FoodError::shape(format!("{:?}", first.shape()), format!("{:?}", odd.shape())));
            }
        }
        Ok(TensorBatch { images })
    }

    /// Wraps one image with a leading batch dimension of size 1.
    pub fn single(image: ImageTensor) -> Self {
        TensorBatch { images: vec![image] }
    }

    /// `[batch, height, width, channels]`; zero dims for an empty batch.
    pub fn shape(&self) -> [usize; 4] {
        match self.images.first() {
            Some(t) => [self.images.len(), t.height, t.width, t.channels],
            None => [0, 0, 0, 0],
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[ImageTensor] {
        &self.images
    }

    pub fn into_images(self) -> Vec<ImageTensor> {
        self.images
    }
}
