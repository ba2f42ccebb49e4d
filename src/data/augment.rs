use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::math::tensor::ImageTensor;

/// Random geometric augmentation applied to training images after rescale.
///
/// All transforms are combined into one inverse affine map around the image
/// centre and sampled with nearest-neighbour lookup. Points that fall outside
/// the source are clamped to the closest edge pixel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Augmentation {
    /// Maximum rotation in degrees, either direction.
    pub rotation_degrees: f32,
    /// Maximum horizontal shift as a fraction of width.
    pub width_shift: f32,
    /// Maximum vertical shift as a fraction of height.
    pub height_shift: f32,
    pub horizontal_flip: bool,
    /// Zoom factor is drawn from `[1 - zoom, 1 + zoom]` per axis.
    pub zoom: f32,
}

impl Default for Augmentation {
    fn default() -> Self {
        Augmentation {
            rotation_degrees: 20.0,
            width_shift: 0.2,
            height_shift: 0.2,
            horizontal_flip: true,
            zoom: 0.2,
        }
    }
}

impl Augmentation {
    /// An augmentation that leaves every image unchanged.
    pub fn none() -> Self {
        Augmentation {
            rotation_degrees: 0.0,
            width_shift: 0.0,
            height_shift: 0.0,
            horizontal_flip: false,
            zoom: 0.0,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation_degrees == 0.0
            && self.width_shift == 0.0
            && self.height_shift == 0.0
            && !self.horizontal_flip
            && self.zoom == 0.0
    }

    /// Returns a randomly transformed copy with the same shape.
    pub fn apply<R: Rng + ?Sized>(&self, image: &ImageTensor, rng: &mut R) -> ImageTensor {
        if self.is_identity() {
            return image.clone();
        }

        let [h, w, c] = image.shape();
        let angle = symmetric(rng, self.rotation_degrees).to_radians();
        let tx = symmetric(rng, self.width_shift) * w as f32;
        let ty = symmetric(rng, self.height_shift) * h as f32;
        let zx = 1.0 + symmetric(rng, self.zoom);
        let zy = 1.0 + symmetric(rng, self.zoom);
        let flip = self.horizontal_flip && rng.gen_bool(0.5);

        let (sin, cos) = angle.sin_cos();
        let cx = (w as f32 - 1.0) / 2.0;
        let cy = (h as f32 - 1.0) / 2.0;

        let mut out = ImageTensor::zeros(h, w, c);
        for y in 0..h {
            for x in 0..w {
                let ox = if flip { (w - 1 - x) as f32 } else { x as f32 };
                // Undo the shift, then rotation, then zoom.
                let dx = ox - cx - tx;
                let dy = y as f32 - cy - ty;
                let rx = cos * dx + sin * dy;
                let ry = -sin * dx + cos * dy;
                let sx = (rx * zx + cx).round().clamp(0.0, (w - 1) as f32) as usize;
                let sy = (ry * zy + cy).round().clamp(0.0, (h - 1) as f32) as usize;
                out.pixel_mut(y, x).copy_from_slice(image.pixel(sy, sx));
            }
        }
        out
    }
}

fn symmetric<R: Rng + ?Sized>(rng: &mut R, range: f32) -> f32 {
    if range > 0.0 {
        rng.gen_range(-range..=range)
    } else {
        0.0
    }
}
