//! Turning per-patch predictions into a ranked list of detections.
//!
//! Each patch votes for the query it matches best; its score is the sigmoid of
//! that logit. Padding queries carry a logit of -1e6 and never win.

use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::math::sigmoid;
use crate::model::DetectionOutput;

/// A box in normalized (cx, cy, w, h) form, relative to the padded square input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    /// Pixel corners `[x_min, y_min, x_max, y_max]` on a square canvas of
    /// side `canvas_side`.
    ///
    /// Padding sits at the bottom/right, so the canvas origin is the image
    /// origin and the same scale applies to both axes.
    pub fn to_corners(&self, canvas_side: f32) -> [f32; 4] {
        [
            (self.cx - self.w / 2.0) * canvas_side,
            (self.cy - self.h / 2.0) * canvas_side,
            (self.cx + self.w / 2.0) * canvas_side,
            (self.cy + self.h / 2.0) * canvas_side,
        ]
    }
}

/// One patch's best match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Index of the winning query
    pub query_index: usize,
    /// Sigmoid of the winning logit
    pub score: f32,
    pub bbox: BoundingBox,
}

/// Detections for image `batch_index`, best first.
///
/// Patches scoring below `score_threshold` are dropped, and at most
/// `max_detections` are returned.
pub fn top_detections(
    output: &DetectionOutput,
    batch_index: usize,
    score_threshold: f32,
    max_detections: usize,
) -> ModelResult<Vec<Detection>> {
    let batch = output.pred_logits.len_of(Axis(0));
    if batch_index >= batch {
        return Err(ModelError::InvalidArgument(format!(
            "batch index {batch_index} out of range for a batch of {batch}"
        )));
    }

    let logits = output.pred_logits.index_axis(Axis(0), batch_index);
    let boxes = output.pred_boxes.index_axis(Axis(0), batch_index);
    if logits.nrows() != boxes.nrows() {
        return Err(ModelError::Shape(format!(
            "{} patches scored but {} boxes predicted",
            logits.nrows(),
            boxes.nrows()
        )));
    }

    let mut detections: Vec<Detection> = logits
        .outer_iter()
        .zip(boxes.outer_iter())
        .filter_map(|(patch_logits, patch_box)| {
            let (query_index, &logit) = patch_logits
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))?;
            let score = sigmoid(logit);
            (score >= score_threshold).then(|| Detection {
                query_index,
                score,
                bbox: BoundingBox {
                    cx: patch_box[0],
                    cy: patch_box[1],
                    w: patch_box[2],
                    h: patch_box[3],
                },
            })
        })
        .collect();

    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    detections.truncate(max_detections);
    Ok(detections)
}
