//! Image preprocessing for the vision tower.
//!
//! The detector expects:
//! - A square input (768×768 for the B/32 and B/16 presets)
//! - Aspect ratio preserved: the image sits in the top-left corner, padding
//!   fills the bottom and right with mid-gray
//! - Normalization: CLIP per-channel mean/std over pixel/255
//! - Tensor layout: NHWC [batch, height, width, channels]

use std::path::Path;

use image::DynamicImage;
use ndarray::Array4;

use crate::error::{ModelError, ModelResult};

/// Number of color channels (RGB).
const CHANNELS: usize = 3;

/// CLIP normalization mean (per-channel).
const NORM_MEAN: [f32; CHANNELS] = [0.481_454_66, 0.457_827_5, 0.408_210_73];

/// CLIP normalization std (per-channel).
const NORM_STD: [f32; CHANNELS] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

/// Padding value before normalization.
const PAD_VALUE: f32 = 0.5;

/// A preprocessed image and the geometry needed to map boxes back onto it.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    /// `[1, size, size, 3]`
    pub tensor: Array4<f32>,
    /// Original width in pixels
    pub width: u32,
    /// Original height in pixels
    pub height: u32,
}

impl PreprocessedImage {
    /// Side of the padded square in original-image pixels.
    ///
    /// Normalized box coordinates are relative to this square.
    pub fn canvas_side(&self) -> f32 {
        self.width.max(self.height) as f32
    }
}

/// Open and decode an image file.
pub fn load_image(path: &Path) -> ModelResult<DynamicImage> {
    image::open(path).map_err(|e| ModelError::Image {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Preprocess an image for the vision tower.
///
/// Resizes so the longer side equals `image_size`, pads bottom/right to a
/// square, normalizes with CLIP statistics, and returns an NHWC tensor.
pub fn preprocess(image: &DynamicImage, image_size: u32) -> PreprocessedImage {
    let (width, height) = (image.width(), image.height());
    let resized = image.resize(
        image_size,
        image_size,
        image::imageops::FilterType::Triangle,
    );
    let rgb = resized.to_rgb8();

    let size = image_size as usize;
    let mut tensor = Array4::<f32>::zeros((1, size, size, CHANNELS));
    for c in 0..CHANNELS {
        let pad = (PAD_VALUE - NORM_MEAN[c]) / NORM_STD[c];
        tensor
            .slice_mut(ndarray::s![.., .., .., c])
            .fill(pad);
    }

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        if x >= size || y >= size {
            continue;
        }
        for (c, &val) in pixel.0.iter().enumerate() {
            tensor[[0, y, x, c]] = (val as f32 / 255.0 - NORM_MEAN[c]) / NORM_STD[c];
        }
    }

    PreprocessedImage {
        tensor,
        width,
        height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    #[test]
    fn test_preprocess_shape() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(640, 480));
        let out = preprocess(&img, 768);
        assert_eq!(out.tensor.shape(), &[1, 768, 768, 3]);
        assert_eq!((out.width, out.height), (640, 480));
        assert_eq!(out.canvas_side(), 640.0);
    }

    #[test]
    fn test_preprocess_pads_bottom() {
        // Landscape 2:1 -> content fills the top half, padding the bottom half.
        let img =
            DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, image::Rgb([255, 255, 255])));
        let out = preprocess(&img, 64);

        let white = (1.0 - NORM_MEAN[0]) / NORM_STD[0];
        let pad = (PAD_VALUE - NORM_MEAN[0]) / NORM_STD[0];
        assert!((out.tensor[[0, 10, 10, 0]] - white).abs() < 1e-3);
        assert!((out.tensor[[0, 60, 10, 0]] - pad).abs() < 1e-3);
    }

    #[test]
    fn test_preprocess_normalization_range() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, image::Rgb([0, 0, 0])));
        let out = preprocess(&img, 32);
        let min_val = out.tensor.iter().cloned().fold(f32::INFINITY, f32::min);
        let expected = -NORM_MEAN[0] / NORM_STD[0];
        assert!((min_val - expected).abs() < 0.01);
    }

    #[test]
    fn test_load_image_missing_file() {
        let err = load_image(Path::new("/nonexistent/cat.jpg")).unwrap_err();
        assert!(matches!(err, ModelError::Image { .. }));
    }
}
