//! Output records for detection results.
//!
//! These types are what the CLI serializes: one [`ImageDetections`] per image,
//! boxes mapped back to the original image's pixel coordinates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::postprocess::Detection;

/// All detections for one image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDetections {
    /// Path to the source file
    pub file_path: PathBuf,

    /// Just the filename portion
    pub file_name: String,

    /// Original image width in pixels
    pub width: u32,

    /// Original image height in pixels
    pub height: u32,

    /// Text queries, in query-index order
    pub queries: Vec<String>,

    /// Detections, best first
    pub detections: Vec<DetectedObject>,
}

/// A detection labelled with its query text and placed in pixel space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    /// The matching query text
    pub label: String,

    /// Index into [`ImageDetections::queries`]
    pub query_index: usize,

    /// Confidence in [0, 1]
    pub score: f32,

    /// Box in original-image pixels
    pub bbox: PixelBox,
}

/// Axis-aligned box in pixels, clamped to the image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl DetectedObject {
    /// Label a normalized detection and map it onto a `width × height` image
    /// that was padded to a square before inference.
    pub fn from_detection(detection: &Detection, queries: &[String], width: u32, height: u32) -> Self {
        let canvas_side = width.max(height) as f32;
        let [x_min, y_min, x_max, y_max] = detection.bbox.to_corners(canvas_side);
        let (w, h) = (width as f32, height as f32);

        Self {
            label: queries
                .get(detection.query_index)
                .cloned()
                .unwrap_or_default(),
            query_index: detection.query_index,
            score: detection.score,
            bbox: PixelBox {
                x_min: x_min.clamp(0.0, w),
                y_min: y_min.clamp(0.0, h),
                x_max: x_max.clamp(0.0, w),
                y_max: y_max.clamp(0.0, h),
            },
        }
    }
}
