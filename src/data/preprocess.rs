/// Image decoding and normalization shared by training and inference.
///
/// Every image entering the model goes through the same steps: decode,
/// convert to RGB, resize to exactly `size × size`, scale to [0, 1].
use std::path::Path;

use image::imageops::FilterType;

use crate::error::{FoodError, Result};
use crate::math::tensor::{ImageTensor, TensorBatch};

/// Default model input resolution.
pub const INPUT_SIZE: u32 = 224;

/// Extensions accepted when scanning class folders (compared lowercase).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Case-insensitive extension check.
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Decodes in-memory image bytes into a normalized `size × size × 3` tensor.
pub fn decode_bytes(bytes: &[u8], size: u32) -> Result<ImageTensor> {
    if bytes.is_empty() {
        return Err(FoodError::InvalidInput("empty image payload".into()));
    }
    let img = image::load_from_memory(bytes)?;
    Ok(normalize(img, size))
}

/// Reads and decodes an image file.
pub fn load_file(path: &Path, size: u32) -> Result<ImageTensor> {
    let img = image::open(path)?;
    Ok(normalize(img, size))
}

/// Inference preprocessing: decoded image with a leading batch dimension,
/// i.e. shape `(1, size, size, 3)`.
pub fn preprocess_bytes(bytes: &[u8], size: u32) -> Result<TensorBatch> {
    Ok(TensorBatch::single(decode_bytes(bytes, size)?))
}

fn normalize(img: image::DynamicImage, size: u32) -> ImageTensor {
    let rgb = if img.width() == size && img.height() == size {
        img.to_rgb8()
    } else {
        img.resize_exact(size, size, FilterType::Triangle).to_rgb8()
    };
    ImageTensor::from_rgb(&rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_fn(width, height, |x, y| Rgba([(x * 7) as u8, (y * 3) as u8, 200, 128]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn preprocess_shape_and_range() {
        let batch = preprocess_bytes(&png_bytes(640, 480), INPUT_SIZE).unwrap();
        assert_eq!(batch.shape(), [1, 224, 224, 3]);
        let (lo, hi) = batch.images()[0].value_range();
        assert!(lo >= 0.0 && hi <= 1.0);
    }

    #[test]
    fn small_and_alpha_images_are_normalized() {
        let batch = preprocess_bytes(&png_bytes(10, 30), INPUT_SIZE).unwrap();
        assert_eq!(batch.shape(), [1, 224, 224, 3]);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let err = decode_bytes(b"definitely not an image", INPUT_SIZE).unwrap_err();
        assert!(err.is_client_error());
        assert!(decode_bytes(&[], INPUT_SIZE).unwrap_err().is_client_error());
    }

    #[test]
    fn exact_size_keeps_pixels() {
        let img = RgbImage::from_pixel(4, 4, Rgb([255, 0, 51]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
        let t = decode_bytes(&out.into_inner(), 4).unwrap();
        assert_eq!(t.pixel(2, 3), &[1.0, 0.0, 0.2]);
    }

    #[test]
    fn extension_filter_ignores_case() {
        assert!(has_image_extension(Path::new("a/b/IMG_01.JPG")));
        assert!(has_image_extension(Path::new("x.Png")));
        assert!(!has_image_extension(Path::new("notes.txt")));
        assert!(!has_image_extension(Path::new("README")));
    }
}
