//! CLIP vision/text towers exported to ONNX.
//!
//! The vision tower takes `pixel_values` (NCHW) and yields per-patch embeddings
//! (`[b, n, d]` or `[b, h, w, d]`); the text tower takes `input_ids` (and
//! `attention_mask` when the graph declares one) and yields one embedding per
//! sequence.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::{Array2, Array3, ArrayView2, ArrayView4};
use ort::session::Session;
use ort::value::Value;

use crate::checkpoint::{CheckpointStore, SafetensorsStore};
use crate::config::BodyConfig;
use crate::error::{ModelError, ModelResult};
use crate::heads::BACKBONE_SCOPE;
use crate::params::Params;

use super::{Embeddings, ImageTextEmbedder};

/// Name of the optional text attention mask input.
const ATTENTION_MASK_INPUT: &str = "attention_mask";

/// ONNX Runtime backed image-text embedder.
///
/// Uses a `Mutex` per session because `Session::run` requires `&mut self`.
pub struct OnnxClipEmbedder {
    vision: Mutex<Session>,
    /// Name of the vision input tensor (detected from model metadata).
    vision_input: String,
    image_output: String,
    text: Mutex<Session>,
    /// Name of the token id input (detected from model metadata).
    text_input: String,
    text_uses_attention_mask: bool,
    text_output: String,
}

impl OnnxClipEmbedder {
    /// Load both towers from `model_dir` using the filenames in `body`.
    pub fn load(body: &BodyConfig, model_dir: &Path) -> ModelResult<Self> {
        let vision_path = model_dir.join(&body.vision_model);
        let text_path = model_dir.join(&body.text_model);

        tracing::info!("Loading vision tower from {:?}", vision_path);
        let vision = open_session(&vision_path)?;
        tracing::info!("Loading text tower from {:?}", text_path);
        let text = open_session(&text_path)?;

        let vision_input = vision
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .unwrap_or_else(|| "pixel_values".to_string());

        let text_input_names: Vec<String> =
            text.inputs().iter().map(|i| i.name().to_string()).collect();
        let text_uses_attention_mask = text_input_names.iter().any(|n| n == ATTENTION_MASK_INPUT);
        let text_input = text_input_names
            .iter()
            .find(|n| n.as_str() != ATTENTION_MASK_INPUT)
            .cloned()
            .unwrap_or_else(|| "input_ids".to_string());

        tracing::debug!(
            "Embedder ready (vision input: {:?}, text inputs: {:?}, outputs: {:?} / {:?})",
            vision_input,
            text_input_names,
            body.image_output,
            body.text_output
        );

        Ok(Self {
            vision: Mutex::new(vision),
            vision_input,
            image_output: body.image_output.clone(),
            text: Mutex::new(text),
            text_input,
            text_uses_attention_mask,
            text_output: body.text_output.clone(),
        })
    }

    /// Check whether both tower files exist on disk.
    pub fn model_exists(body: &BodyConfig, model_dir: &Path) -> bool {
        Self::model_paths(body, model_dir).iter().all(|p| p.exists())
    }

    /// Expected vision and text tower paths.
    pub fn model_paths(body: &BodyConfig, model_dir: &Path) -> [PathBuf; 2] {
        [
            model_dir.join(&body.vision_model),
            model_dir.join(&body.text_model),
        ]
    }

    /// Per-patch features for a batch of NHWC images, `[b, n, d]`.
    fn embed_images(&self, images: ArrayView4<'_, f32>) -> ModelResult<Array3<f32>> {
        let (b, h, w, c) = images.dim();
        // NHWC -> NCHW, flattened in logical order.
        let flat_data: Vec<f32> = images.permuted_axes([0, 3, 1, 2]).iter().copied().collect();
        let shape = vec![b as i64, c as i64, h as i64, w as i64];

        let input_value = Value::from_array((shape, flat_data)).map_err(|e| embedder_error(
            format!("Failed to create image input tensor: {e}"),
        ))?;
        let inputs = ort::inputs![self.vision_input.as_str() => input_value];

        let mut session = self
            .vision
            .lock()
            .map_err(|e| embedder_error(format!("Vision session lock poisoned: {e}")))?;
        let outputs = session
            .run(inputs)
            .map_err(|e| embedder_error(format!("Vision inference failed: {e}")))?;

        let output = outputs
            .iter()
            .find(|(name, _)| *name == self.image_output.as_str())
            .ok_or_else(|| {
                embedder_error(format!("Vision tower did not produce {}", self.image_output))
            })?;
        let (shape, data) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| embedder_error(format!("Failed to extract {}: {e}", self.image_output)))?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

        // Either a token sequence [b, n, d] or an already spatial map [b, gh, gw, d].
        let (ob, n, d) = match dims.as_slice() {
            &[ob, n, d] => (ob, n, d),
            &[ob, gh, gw, d] => (ob, gh * gw, d),
            _ => {
                return Err(embedder_error(format!(
                    "Unexpected {} shape: {:?}",
                    self.image_output, dims
                )))
            }
        };
        if ob != b {
            return Err(ModelError::Shape(format!(
                "vision tower returned batch {ob} for {b} images"
            )));
        }

        Ok(Array3::from_shape_vec((b, n, d), data.to_vec())?)
    }

    /// One embedding per token row, `[num_texts, d]`.
    fn embed_texts(&self, tokens: ArrayView2<'_, i64>) -> ModelResult<Array2<f32>> {
        let (num_texts, max_len) = tokens.dim();
        let shape = vec![num_texts as i64, max_len as i64];
        let input_ids: Vec<i64> = tokens.iter().copied().collect();

        let ids_value = Value::from_array((shape.clone(), input_ids.clone()))
            .map_err(|e| embedder_error(format!("Failed to create text input tensor: {e}")))?;

        let mut session = self
            .text
            .lock()
            .map_err(|e| embedder_error(format!("Text session lock poisoned: {e}")))?;

        let outputs = if self.text_uses_attention_mask {
            let mask: Vec<i64> = input_ids.iter().map(|&id| i64::from(id != 0)).collect();
            let mask_value = Value::from_array((shape, mask))
                .map_err(|e| embedder_error(format!("Failed to create attention mask: {e}")))?;
            session.run(ort::inputs![
                self.text_input.as_str() => ids_value,
                ATTENTION_MASK_INPUT => mask_value
            ])
        } else {
            session.run(ort::inputs![self.text_input.as_str() => ids_value])
        }
        .map_err(|e| embedder_error(format!("Text inference failed: {e}")))?;

        let output = outputs
            .iter()
            .find(|(name, _)| *name == self.text_output.as_str())
            .ok_or_else(|| {
                embedder_error(format!("Text tower did not produce {}", self.text_output))
            })?;
        let (shape, data) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| embedder_error(format!("Failed to extract {}: {e}", self.text_output)))?;

        let dim = match shape.len() {
            2 => shape[1] as usize,
            _ => {
                return Err(embedder_error(format!(
                    "Unexpected {} shape: {:?}",
                    self.text_output, shape
                )))
            }
        };

        Ok(Array2::from_shape_vec((num_texts, dim), data.to_vec())?)
    }
}

impl ImageTextEmbedder for OnnxClipEmbedder {
    fn embed(
        &self,
        images: Option<ArrayView4<'_, f32>>,
        texts: Option<ArrayView2<'_, i64>>,
        train: bool,
    ) -> ModelResult<Embeddings> {
        if train {
            tracing::warn!("ONNX towers are exported for inference; train=true has no effect");
        }

        let image = images.map(|images| self.embed_images(images)).transpose()?;
        let text = texts.map(|texts| self.embed_texts(texts)).transpose()?;
        Ok(Embeddings { image, text })
    }

    /// Overlay weights from a safetensors CLIP checkpoint onto `params`.
    ///
    /// A checkpoint that wraps everything in a `backbone` group is unwrapped first.
    fn load_backbone(&self, params: Params, checkpoint_path: &Path) -> ModelResult<Params> {
        let mut loaded = SafetensorsStore::new().restore(checkpoint_path)?;
        if loaded.contains(BACKBONE_SCOPE) {
            loaded = loaded.into_child(BACKBONE_SCOPE).unwrap_or_default();
        }

        tracing::info!(
            "Loaded {} backbone weights from {:?}",
            loaded.num_weights(),
            checkpoint_path
        );

        let mut params = params;
        params.merge(loaded);
        Ok(params)
    }
}

fn open_session(model_path: &Path) -> ModelResult<Session> {
    if !model_path.exists() {
        return Err(ModelError::Embedder {
            message: format!(
                "Model not found at {:?}. Run `owlvit models list` to see what is missing.",
                model_path
            ),
        });
    }

    Session::builder()
        .map_err(|e| embedder_error(format!("Failed to create ONNX session builder: {e}")))?
        .commit_from_file(model_path)
        .map_err(|e| embedder_error(format!("Failed to load ONNX model {:?}: {e}", model_path)))
}

fn embedder_error(message: String) -> ModelError {
    ModelError::Embedder { message }
}
