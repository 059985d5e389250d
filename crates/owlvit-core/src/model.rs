//! Text-conditioned zero-shot detection.
//!
//! [`TextZeroShotDetector`] owns the image-text embedder, the tokenizer and
//! both prediction heads. One forward pass embeds the images and the text
//! queries, scores every patch against every query and regresses one box per
//! patch:
//!
//! ```text
//! images ─► embedder ─► feature_map [b,h,w,d] ─► flatten ─► image_features [b,h*w,d]
//!                                                              │            │
//! queries ─► embedder ─► query_embeddings [b,q,e] ─► class head ◄┘            ▼
//!        └─► first token != 0 ─► query_mask [b,q] ──────┘             box head
//! ```

use std::path::Path;

use ndarray::{
    Array2, Array3, Array4, ArrayD, ArrayView3, ArrayView4, ArrayViewD, Axis, Ix3, IxDyn,
};

use crate::checkpoint::{CheckpointLayout, CheckpointStore, SafetensorsStore};
use crate::config::{Codebase, Config, DetectionConfig, ModelConfig};
use crate::embedding::{seq2img, ImageTextEmbedder, OnnxClipEmbedder, PreprocessedImage};
use crate::error::{ConfigError, ModelError, ModelResult, Result};
use crate::heads::{
    BoxHead, ClassHead, ClassPrediction, Queries, BOX_HEAD_LAYERS, BOX_HEAD_SCOPE,
    CLASS_HEAD_SCOPE,
};
use crate::loader;
use crate::params::{Params, Variables};
use crate::postprocess::{top_detections, Detection};
use crate::tokenizer::{ClipTokenizer, TextTokenizer};

/// Everything one forward pass produces.
#[derive(Debug, Clone)]
pub struct DetectionOutput {
    /// `[batch, h, w, d]`
    pub feature_map: Array4<f32>,
    /// `[batch, num_queries, embed_dim]`
    pub query_embeddings: Array3<f32>,
    /// `[batch, num_queries]`, 1.0 for real queries
    pub query_mask: Array2<f32>,
    /// `[batch, h * w, embed_dim]`
    pub class_embeddings: Array3<f32>,
    /// `[batch, h * w, num_queries]`
    pub pred_logits: Array3<f32>,
    /// `[batch, h * w, 4]` as (cx, cy, w, h) in (0, 1)
    pub pred_boxes: Array3<f32>,
}

/// Open-vocabulary detector conditioned on text queries.
pub struct TextZeroShotDetector {
    embedder: Box<dyn ImageTextEmbedder>,
    tokenizer: Box<dyn TextTokenizer>,
    class_head: ClassHead,
    box_head: BoxHead,
}

impl TextZeroShotDetector {
    /// Assemble a detector from its parts and trained variables.
    ///
    /// The class head must project into the embedding width of the configured
    /// body variant.
    pub fn new(
        config: &ModelConfig,
        embedder: Box<dyn ImageTextEmbedder>,
        tokenizer: Box<dyn TextTokenizer>,
        variables: &Variables,
    ) -> Result<Self> {
        let preset = config.body.preset()?;
        let class_head = ClassHead::from_params(
            &variables.params,
            CLASS_HEAD_SCOPE,
            preset.embed_dim,
            config.normalize,
        )?;
        let box_head = BoxHead::from_params(
            &variables.params,
            BOX_HEAD_SCOPE,
            BOX_HEAD_LAYERS,
            config.box_bias,
        )?;

        tracing::debug!(
            "Detector ready (variant: {}, embed dim: {}, normalize: {}, box bias: {})",
            preset.name,
            class_head.embed_dim(),
            class_head.normalize(),
            box_head.bias_kind()
        );

        Ok(Self {
            embedder,
            tokenizer,
            class_head,
            box_head,
        })
    }

    /// Build the ONNX-backed detector described by `config`, restoring
    /// parameters through [`loader::load`].
    ///
    /// Needs a detector checkpoint: `init.codebase = "clip"` carries backbone
    /// weights only and leaves both heads without parameters.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.init.codebase == Some(Codebase::Clip) {
            return Err(ConfigError::ValidationError(
                "init.codebase = \"clip\" restores only the backbone; the class and box \
                 heads need a detector checkpoint (unset init.codebase)"
                    .to_string(),
            )
            .into());
        }

        let model_dir = config.model_dir();
        let body = &config.model.body;

        let tokenizer = ClipTokenizer::from_file(&model_dir.join(&body.tokenizer))?;
        let embedder = OnnxClipEmbedder::load(body, &model_dir)?;

        let params = loader::load(Params::tree(), &config.init, &SafetensorsStore::new(), &embedder)?;
        tracing::info!("Loaded {} parameters", params.num_weights());

        Self::new(
            &config.model,
            Box::new(embedder),
            Box::new(tokenizer),
            &Variables::new(params),
        )
    }

    /// Tokenize one query.
    pub fn tokenize(&self, text: &str, max_len: usize) -> ModelResult<Vec<i64>> {
        self.tokenizer.tokenize(text, max_len)
    }

    /// Tokenize per-image query lists into `[batch, num_queries, max_len]`.
    ///
    /// Lists shorter than the longest one are padded with all-zero rows.
    pub fn tokenize_queries(
        &self,
        queries: &[Vec<String>],
        max_len: usize,
    ) -> ModelResult<Array3<i64>> {
        let num_queries = queries.iter().map(Vec::len).max().unwrap_or(0);
        let mut tokens = Array3::<i64>::zeros((queries.len(), num_queries, max_len));
        for (bi, image_queries) in queries.iter().enumerate() {
            for (qi, text) in image_queries.iter().enumerate() {
                let ids = self.tokenize(text, max_len)?;
                if ids.len() != max_len {
                    return Err(ModelError::Shape(format!(
                        "tokenizer returned {} tokens for max_len {max_len}",
                        ids.len()
                    )));
                }
                tokens
                    .slice_mut(ndarray::s![bi, qi, ..])
                    .assign(&ndarray::ArrayView1::from(&ids));
            }
        }
        Ok(tokens)
    }

    /// Restore detector variables from a checkpoint of either lineage.
    pub fn load_variables(store: &dyn CheckpointStore, checkpoint_path: &Path) -> Result<Variables> {
        let restored = store.restore(checkpoint_path)?;
        let layout = CheckpointLayout::resolve(restored, checkpoint_path)?;
        tracing::info!(
            "Restored {:?} ({} checkpoint)",
            checkpoint_path,
            layout.lineage()
        );
        Ok(Variables::new(layout.into_params()))
    }

    /// Image features laid out on the patch grid, `[batch, h, w, d]`.
    pub fn image_embedder(&self, images: ArrayView4<'_, f32>, train: bool) -> ModelResult<Array4<f32>> {
        let (_, height, width, _) = images.dim();
        let features = self
            .embedder
            .embed(Some(images), None, train)?
            .image
            .ok_or_else(|| ModelError::Embedder {
                message: "embedder returned no image features".to_string(),
            })?;
        seq2img((height, width), features)
    }

    /// Embed token rows of any leading shape; the last axis becomes the embedding.
    pub fn text_embedder(&self, text_queries: ArrayViewD<'_, i64>, train: bool) -> ModelResult<ArrayD<f32>> {
        let shape = text_queries.shape().to_vec();
        let Some((&max_len, leading)) = shape.split_last() else {
            return Err(ModelError::InvalidArgument(
                "text queries must have a token axis".to_string(),
            ));
        };
        let rows: usize = leading.iter().product();

        let flat = text_queries.to_shape((rows, max_len))?;
        let embedded = self
            .embedder
            .embed(None, Some(flat.view()), train)?
            .text
            .ok_or_else(|| ModelError::Embedder {
                message: "embedder returned no text features".to_string(),
            })?;
        if embedded.nrows() != rows {
            return Err(ModelError::Shape(format!(
                "embedder returned {} text embeddings for {rows} queries",
                embedded.nrows()
            )));
        }

        let mut out_shape = leading.to_vec();
        out_shape.push(embedded.ncols());
        Ok(embedded.into_shape_with_order(IxDyn(&out_shape))?)
    }

    /// 1.0 where a query's first token is nonzero, else 0.0.
    pub fn query_mask(text_queries: ArrayView3<'_, i64>) -> Array2<f32> {
        let (b, q, max_len) = text_queries.dim();
        if max_len == 0 {
            return Array2::zeros((b, q));
        }
        text_queries
            .index_axis(Axis(2), 0)
            .mapv(|token| if token != 0 { 1.0 } else { 0.0 })
    }

    pub fn class_predictor(
        &self,
        image_features: ArrayView3<'_, f32>,
        queries: Queries<'_>,
    ) -> ModelResult<ClassPrediction> {
        self.class_head.predict(image_features, queries)
    }

    pub fn box_predictor(
        &self,
        image_features: ArrayView3<'_, f32>,
        feature_map: ArrayView4<'_, f32>,
    ) -> ModelResult<Array3<f32>> {
        self.box_head.predict(image_features, feature_map)
    }

    /// Full pass: `images` is `[batch, h, w, 3]`, `text_queries` is
    /// `[batch, num_queries, max_len]`.
    pub fn forward(
        &self,
        images: ArrayView4<'_, f32>,
        text_queries: ArrayView3<'_, i64>,
        train: bool,
    ) -> ModelResult<DetectionOutput> {
        let batch = images.len_of(Axis(0));
        if text_queries.len_of(Axis(0)) != batch {
            return Err(ModelError::Shape(format!(
                "{} query lists for a batch of {batch} images",
                text_queries.len_of(Axis(0))
            )));
        }

        let feature_map = self.image_embedder(images, train)?;
        let (b, h, w, d) = feature_map.dim();
        let image_features = feature_map.to_shape((b, h * w, d))?.into_owned();

        let query_embeddings = self
            .text_embedder(text_queries.into_dyn(), train)?
            .into_dimensionality::<Ix3>()?;
        let query_mask = Self::query_mask(text_queries);

        let ClassPrediction {
            class_embeddings,
            pred_logits,
        } = self.class_predictor(
            image_features.view(),
            Queries::new(query_embeddings.view(), query_mask.view()),
        )?;
        let pred_logits = pred_logits.ok_or_else(|| {
            ModelError::InvalidArgument("class head produced no logits for present queries".to_string())
        })?;
        let pred_boxes = self.box_predictor(image_features.view(), feature_map.view())?;

        Ok(DetectionOutput {
            feature_map,
            query_embeddings,
            query_mask,
            class_embeddings,
            pred_logits,
            pred_boxes,
        })
    }

    /// Detect `queries` in one preprocessed image.
    pub fn detect(
        &self,
        image: &PreprocessedImage,
        queries: &[String],
        detection: &DetectionConfig,
    ) -> ModelResult<Vec<Detection>> {
        let tokens = self.tokenize_queries(&[queries.to_vec()], detection.max_query_length)?;
        let output = self.forward(image.tensor.view(), tokens.view(), false)?;
        top_detections(
            &output,
            0,
            detection.score_threshold,
            detection.max_detections,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryStore;
    use crate::error::{ConfigError, OwlError};
    use crate::test_support::{detector_params, word_tokenizer, FixedEmbedder};
    use ndarray::{array, Array4};

    const IMAGE_DIM: usize = 8;
    const EMBED_DIM: usize = 512;
    const PATCH: usize = 4;

    fn embedder() -> Box<dyn ImageTextEmbedder> {
        Box::new(FixedEmbedder {
            patch_size: PATCH,
            image_dim: IMAGE_DIM,
            text_dim: EMBED_DIM,
        })
    }

    fn detector(variables: &Variables) -> TextZeroShotDetector {
        TextZeroShotDetector::new(
            &ModelConfig::default(),
            embedder(),
            Box::new(word_tokenizer()),
            variables,
        )
        .unwrap()
    }

    fn images(b: usize, h: usize, w: usize) -> Array4<f32> {
        Array4::from_shape_fn((b, h, w, 3), |(bi, y, x, c)| {
            ((bi * 7 + y * 3 + x + c) % 11) as f32 / 11.0
        })
    }

    #[test]
    fn test_forward_shapes() {
        let det = detector(&Variables::new(detector_params(IMAGE_DIM, EMBED_DIM)));
        let queries = vec![
            vec!["a cat".to_string(), "a dog".to_string()],
            vec!["a photo of a dog".to_string()],
        ];
        let tokens = det.tokenize_queries(&queries, 8).unwrap();
        assert_eq!(tokens.dim(), (2, 2, 8));

        let out = det.forward(images(2, 16, 24).view(), tokens.view(), false).unwrap();
        assert_eq!(out.feature_map.dim(), (2, 4, 6, IMAGE_DIM));
        assert_eq!(out.query_embeddings.dim(), (2, 2, EMBED_DIM));
        assert_eq!(out.pred_logits.dim(), (2, 24, 2));
        assert_eq!(out.pred_boxes.dim(), (2, 24, 4));
        assert_eq!(out.query_mask, array![[1.0, 1.0], [1.0, 0.0]]);

        // The padded second query of image 1 can never score.
        for p in 0..24 {
            assert_eq!(out.pred_logits[[1, p, 1]], crate::heads::MASKED_LOGIT);
        }
        assert!(out.pred_boxes.iter().all(|&v| v > 0.0 && v < 1.0));
    }

    #[test]
    fn test_query_mask_only_reads_first_token() {
        let tokens = array![[[0_i64, 5, 6], [3, 0, 0], [0, 0, 0], [9, 9, 9]]];
        let mask = TextZeroShotDetector::query_mask(tokens.view());
        assert_eq!(mask, array![[0.0, 1.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_text_embedder_replaces_last_axis() {
        let det = detector(&Variables::new(detector_params(IMAGE_DIM, EMBED_DIM)));
        let tokens = ndarray::Array3::<i64>::ones((2, 3, 5));
        let out = det.text_embedder(tokens.view().into_dyn(), false).unwrap();
        assert_eq!(out.shape(), &[2, 3, EMBED_DIM]);

        let single = ndarray::Array1::<i64>::ones(5);
        let out = det.text_embedder(single.view().into_dyn(), false).unwrap();
        assert_eq!(out.shape(), &[EMBED_DIM]);
    }

    #[test]
    fn test_image_embedder_rejects_non_grid() {
        let det = detector(&Variables::new(detector_params(IMAGE_DIM, EMBED_DIM)));
        // 16x16 image yields a 4x4 grid, which cannot lay out over a 16x48 aspect.
        struct Skewed(FixedEmbedder);
        impl ImageTextEmbedder for Skewed {
            fn embed(
                &self,
                _images: Option<ArrayView4<'_, f32>>,
                texts: Option<ndarray::ArrayView2<'_, i64>>,
                train: bool,
            ) -> ModelResult<crate::embedding::Embeddings> {
                let square = images(1, 16, 16);
                self.0.embed(Some(square.view()), texts, train)
            }
            fn load_backbone(&self, params: Params, path: &Path) -> ModelResult<Params> {
                self.0.load_backbone(params, path)
            }
        }
        let skewed = TextZeroShotDetector {
            embedder: Box::new(Skewed(FixedEmbedder {
                patch_size: PATCH,
                image_dim: IMAGE_DIM,
                text_dim: EMBED_DIM,
            })),
            ..det
        };
        let err = skewed.image_embedder(images(1, 16, 48).view(), false).unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)));
    }

    #[test]
    fn test_batch_mismatch_is_shape_error() {
        let det = detector(&Variables::new(detector_params(IMAGE_DIM, EMBED_DIM)));
        let tokens = ndarray::Array3::<i64>::ones((1, 1, 4));
        let err = det.forward(images(2, 16, 16).view(), tokens.view(), false).unwrap_err();
        assert!(matches!(err, ModelError::Shape(_)));
    }

    #[test]
    fn test_load_variables_then_forward_for_both_lineages() {
        let store = MemoryStore::new();

        let mut current = Params::tree();
        current.insert("params", detector_params(IMAGE_DIM, EMBED_DIM)).unwrap();
        store.insert("/ckpt/current", current);

        let mut legacy = Params::tree();
        legacy
            .insert_path("optimizer.target", detector_params(IMAGE_DIM, EMBED_DIM))
            .unwrap();
        store.insert("/ckpt/legacy", legacy);

        for path in ["/ckpt/current", "/ckpt/legacy"] {
            let variables = TextZeroShotDetector::load_variables(&store, Path::new(path)).unwrap();
            assert_eq!(variables.params, detector_params(IMAGE_DIM, EMBED_DIM));

            let det = detector(&variables);
            let tokens = det.tokenize_queries(&[vec!["a cat".to_string()]], 6).unwrap();
            let out = det.forward(images(1, 8, 8).view(), tokens.view(), false).unwrap();
            assert_eq!(out.pred_logits.dim(), (1, 4, 1));
        }
    }

    #[test]
    fn test_load_variables_malformed_checkpoint() {
        let store = MemoryStore::new();
        store.insert("/ckpt/bad", detector_params(IMAGE_DIM, EMBED_DIM));
        let err = TextZeroShotDetector::load_variables(&store, Path::new("/ckpt/bad")).unwrap_err();
        assert!(matches!(
            err,
            OwlError::Config(ConfigError::MalformedCheckpoint { .. })
        ));
    }

    #[test]
    fn test_new_rejects_unknown_variant() {
        let mut config = ModelConfig::default();
        config.body.variant = "vit_x".to_string();
        let result = TextZeroShotDetector::new(
            &config,
            embedder(),
            Box::new(word_tokenizer()),
            &Variables::new(detector_params(IMAGE_DIM, EMBED_DIM)),
        );
        assert!(matches!(
            result,
            Err(OwlError::Config(ConfigError::UnknownVariant(_)))
        ));
    }

    #[test]
    fn test_detect_returns_scored_queries() {
        let det = detector(&Variables::new(detector_params(IMAGE_DIM, EMBED_DIM)));
        let image = PreprocessedImage {
            tensor: images(1, 16, 16),
            width: 32,
            height: 32,
        };
        let config = DetectionConfig {
            score_threshold: 0.0,
            max_detections: 5,
            ..Default::default()
        };
        let detections = det
            .detect(&image, &["a cat".to_string(), "a dog".to_string()], &config)
            .unwrap();
        assert_eq!(detections.len(), 5);
        assert!(detections.iter().all(|d| d.query_index < 2));
        assert!(detections.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_from_config_rejects_backbone_only_init() {
        let mut config = Config::default();
        config.init.codebase = Some(Codebase::Clip);
        config.init.checkpoint_path = Some("/ckpt/clip_b32.safetensors".into());

        let err = TextZeroShotDetector::from_config(&config).err().unwrap();
        match err {
            OwlError::Config(ConfigError::ValidationError(message)) => {
                assert!(message.contains("detector checkpoint"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
