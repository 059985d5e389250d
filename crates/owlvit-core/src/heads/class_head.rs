//! Open-vocabulary classification by image/query embedding similarity.

use ndarray::{Array3, ArrayView2, ArrayView3, Axis};

use crate::error::{ModelError, ModelResult};
use crate::math::{elu, l2_normalize_last_axis};
use crate::params::Params;

use super::dense::Dense;

/// Logit assigned to padding queries, low enough to vanish under sigmoid or softmax.
pub const MASKED_LOGIT: f32 = -1e6;

/// Text (or image) queries to score patches against.
#[derive(Debug, Clone, Copy)]
pub enum Queries<'a> {
    /// Only compute class embeddings.
    Absent,
    /// Score every patch against every query.
    Present {
        /// `[batch, num_queries, embed_dim]`
        embeddings: ArrayView3<'a, f32>,
        /// `[batch, num_queries]`, nonzero where the query is real
        mask: ArrayView2<'a, f32>,
    },
}

impl<'a> Queries<'a> {
    pub fn new(embeddings: ArrayView3<'a, f32>, mask: ArrayView2<'a, f32>) -> Self {
        Self::Present { embeddings, mask }
    }

    /// Build from optional parts; embeddings and mask must come together.
    pub fn from_parts(
        embeddings: Option<ArrayView3<'a, f32>>,
        mask: Option<ArrayView2<'a, f32>>,
    ) -> ModelResult<Self> {
        match (embeddings, mask) {
            (Some(embeddings), Some(mask)) => Ok(Self::Present { embeddings, mask }),
            (None, None) => Ok(Self::Absent),
            (Some(_), None) => Err(ModelError::InvalidArgument(
                "query_embeddings were given without query_mask".to_string(),
            )),
            (None, Some(_)) => Err(ModelError::InvalidArgument(
                "query_mask was given without query_embeddings".to_string(),
            )),
        }
    }
}

/// Output of [`ClassHead::predict`].
#[derive(Debug, Clone)]
pub struct ClassPrediction {
    /// `[batch, num_patches, embed_dim]`
    pub class_embeddings: Array3<f32>,
    /// `[batch, num_patches, num_queries]`, present only when queries were given
    pub pred_logits: Option<Array3<f32>>,
}

/// Projects patch features into the query embedding space and scores them.
#[derive(Debug, Clone)]
pub struct ClassHead {
    dense0: Dense,
    logit_shift: Dense,
    logit_scale: Dense,
    normalize: bool,
}

impl ClassHead {
    /// Load from `{scope}.dense0`, `{scope}.logit_shift` and `{scope}.logit_scale`.
    pub fn from_params(
        params: &Params,
        scope: &str,
        embed_dim: usize,
        normalize: bool,
    ) -> ModelResult<Self> {
        let dense0 = Dense::from_params(params, &format!("{scope}.dense0"))?;
        let logit_shift = Dense::from_params(params, &format!("{scope}.logit_shift"))?;
        let logit_scale = Dense::from_params(params, &format!("{scope}.logit_scale"))?;

        if dense0.out_dim() != embed_dim {
            return Err(ModelError::Shape(format!(
                "{scope}.dense0 projects to {} dims, backbone embeds into {}",
                dense0.out_dim(),
                embed_dim
            )));
        }
        for (name, layer) in [("logit_shift", &logit_shift), ("logit_scale", &logit_scale)] {
            if layer.out_dim() != 1 || layer.in_dim() != dense0.in_dim() {
                return Err(ModelError::Shape(format!(
                    "{scope}.{name} must map {} features to 1, got {} -> {}",
                    dense0.in_dim(),
                    layer.in_dim(),
                    layer.out_dim()
                )));
            }
        }

        Ok(Self {
            dense0,
            logit_shift,
            logit_scale,
            normalize,
        })
    }

    pub fn normalize(&self) -> bool {
        self.normalize
    }

    /// Width of the class embedding space.
    pub fn embed_dim(&self) -> usize {
        self.dense0.out_dim()
    }

    /// Class embeddings only, `[batch, num_patches, embed_dim]`.
    pub fn class_embeddings(&self, image_features: ArrayView3<'_, f32>) -> ModelResult<Array3<f32>> {
        self.dense0.forward(image_features)
    }

    /// Class embeddings, plus per-query logits when queries are present.
    ///
    /// With `normalize`, both embedding sets are L2-normalized before the dot
    /// product and the returned class embeddings are the normalized ones.
    pub fn predict(
        &self,
        image_features: ArrayView3<'_, f32>,
        queries: Queries<'_>,
    ) -> ModelResult<ClassPrediction> {
        let mut class_embeddings = self.class_embeddings(image_features)?;

        let Queries::Present { embeddings, mask } = queries else {
            return Ok(ClassPrediction {
                class_embeddings,
                pred_logits: None,
            });
        };

        let (b, p, d) = class_embeddings.dim();
        let (qb, q, qd) = embeddings.dim();
        if qb != b {
            return Err(ModelError::Shape(format!(
                "image batch is {b} but query batch is {qb}"
            )));
        }
        if qd != d {
            return Err(ModelError::Shape(format!(
                "class embeddings have {d} dims but query embeddings have {qd}"
            )));
        }
        if mask.dim() != (b, q) {
            return Err(ModelError::Shape(format!(
                "query mask is {:?}, expected {:?}",
                mask.dim(),
                (b, q)
            )));
        }

        let mut query_embeddings = embeddings.to_owned();
        if self.normalize {
            l2_normalize_last_axis(&mut query_embeddings);
            l2_normalize_last_axis(&mut class_embeddings);
        }

        let mut logits = Array3::<f32>::zeros((b, p, q));
        for bi in 0..b {
            let sim = class_embeddings
                .index_axis(Axis(0), bi)
                .dot(&query_embeddings.index_axis(Axis(0), bi).t());
            logits.index_axis_mut(Axis(0), bi).assign(&sim);
        }

        let shift = self.logit_shift.forward(image_features)?;
        let mut scale = self.logit_scale.forward(image_features)?;
        scale.mapv_inplace(|v| elu(v) + 1.0);
        logits += &shift;
        logits *= &scale;

        for ((bi, _, qi), logit) in logits.indexed_iter_mut() {
            if mask[[bi, qi]] == 0.0 {
                *logit = MASKED_LOGIT;
            }
        }

        Ok(ClassPrediction {
            class_embeddings,
            pred_logits: Some(logits),
        })
    }
}
