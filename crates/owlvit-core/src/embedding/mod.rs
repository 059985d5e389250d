//! Joint image-text embedding.
//!
//! The backbone is consumed through [`ImageTextEmbedder`]: images become
//! per-patch token features, tokenized queries become one vector each. The
//! bundled implementation, [`OnnxClipEmbedder`], runs exported vision and text
//! towers through ONNX Runtime.
//!
//! # Usage
//!
//! ```rust,ignore
//! use owlvit_core::embedding::{preprocess, ImageTextEmbedder, OnnxClipEmbedder};
//!
//! let config = Config::default();
//! let embedder = OnnxClipEmbedder::load(&config.model.body, &config.model_dir())?;
//! let input = preprocess(&image, config.model.body.input_size()?);
//! let out = embedder.embed(Some(input.tensor.view()), None, false)?;
//! // out.image is [1, num_patches, embed_dim]
//! ```

pub(crate) mod onnx;
pub(crate) mod preprocess;

use std::path::Path;

use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView4};

use crate::error::{ModelError, ModelResult};
use crate::params::Params;

pub use self::onnx::OnnxClipEmbedder;
pub use self::preprocess::{load_image, preprocess, PreprocessedImage};

/// Output of [`ImageTextEmbedder::embed`]; each side is present iff its input was.
#[derive(Debug, Clone, Default)]
pub struct Embeddings {
    /// `[batch, num_tokens, embed_dim]`
    pub image: Option<Array3<f32>>,
    /// `[num_texts, embed_dim]`
    pub text: Option<Array2<f32>>,
}

/// The shared image/text backbone.
pub trait ImageTextEmbedder: Send + Sync {
    /// Embed images (`[batch, h, w, 3]`), token rows (`[num_texts, max_len]`), or both.
    ///
    /// `train` selects stochastic behaviour such as dropout, where the backbone has any.
    fn embed(
        &self,
        images: Option<ArrayView4<'_, f32>>,
        texts: Option<ArrayView2<'_, i64>>,
        train: bool,
    ) -> ModelResult<Embeddings>;

    /// Replace the backbone parameter subtree with weights from an external
    /// checkpoint, keeping entries the checkpoint does not provide.
    fn load_backbone(&self, params: Params, checkpoint_path: &Path) -> ModelResult<Params>;
}

/// Reshape per-patch features `[batch, n, d]` into a grid `[batch, gh, gw, d]`
/// whose aspect ratio matches the `(height, width)` image they came from.
pub fn seq2img(image_hw: (usize, usize), features: Array3<f32>) -> ModelResult<Array4<f32>> {
    let (b, n, d) = features.dim();
    let (h, w) = image_hw;
    if n == 0 || h == 0 || w == 0 {
        return Err(ModelError::Shape(format!(
            "cannot lay out {n} tokens for a {h}x{w} image"
        )));
    }

    let grid_h = (n as f64 * h as f64 / w as f64).sqrt().round() as usize;
    let grid_w = if grid_h > 0 && n % grid_h == 0 {
        n / grid_h
    } else {
        0
    };
    let expected_w = ((grid_h * w) as f64 / h as f64).round() as usize;
    if grid_w == 0 || grid_w != expected_w {
        return Err(ModelError::Shape(format!(
            "{n} image tokens do not form a grid for a {h}x{w} image"
        )));
    }

    Ok(features.into_shape_with_order((b, grid_h, grid_w, d))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq2img_square() {
        let features = Array3::<f32>::zeros((2, 576, 8));
        let grid = seq2img((768, 768), features).unwrap();
        assert_eq!(grid.dim(), (2, 24, 24, 8));
    }

    #[test]
    fn test_seq2img_keeps_row_major_order() {
        let features = Array3::from_shape_fn((1, 6, 1), |(_, i, _)| i as f32);
        let grid = seq2img((64, 96), features).unwrap();
        assert_eq!(grid.dim(), (1, 2, 3, 1));
        assert_eq!(grid[[0, 1, 0, 0]], 3.0);
        assert_eq!(grid[[0, 0, 2, 0]], 2.0);
    }

    #[test]
    fn test_seq2img_rejects_non_grid() {
        let features = Array3::<f32>::zeros((1, 10, 4));
        assert!(matches!(seq2img((64, 64), features), Err(ModelError::Shape(_))));

        // 12 tokens factor as 3x4, but not for a square image.
        let features = Array3::<f32>::zeros((1, 12, 4));
        assert!(matches!(seq2img((64, 64), features), Err(ModelError::Shape(_))));
    }
}
