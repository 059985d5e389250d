//! OWL-ViT Core - open-vocabulary object detection.
//!
//! Images and free-text queries are embedded by a shared image-text backbone;
//! every image patch is scored against every query by embedding similarity and
//! regresses one bounding box.
//!
//! # Architecture
//!
//! ```text
//! Image → Preprocess → Embed patches ─┬─► Class head (similarity to queries) ─┬─► Detections
//! Text  → Tokenize   → Embed queries ─┘   Box head (MLP + grid prior)        ─┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use owlvit_core::{embedding, Config, TextZeroShotDetector};
//!
//! fn main() -> owlvit_core::Result<()> {
//!     let config = Config::load()?;
//!     let detector = TextZeroShotDetector::from_config(&config)?;
//!
//!     let image = embedding::load_image("./cat.jpg".as_ref())?;
//!     let input = embedding::preprocess(&image, config.model.body.input_size()?);
//!     let queries = vec!["a photo of a cat".to_string()];
//!     for det in detector.detect(&input, &queries, &config.detection)? {
//!         println!("{} {:.2} {:?}", queries[det.query_index], det.score, det.bbox);
//!     }
//!     Ok(())
//! }
//! ```

// Module declarations
pub mod box_bias;
pub mod checkpoint;
pub mod config;
pub mod embedding;
pub mod error;
pub mod heads;
pub mod loader;
pub mod math;
pub mod model;
pub mod output;
pub mod params;
pub mod postprocess;
pub mod tokenizer;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenient access
pub use box_bias::{compute_box_bias, BoxBiasKind};
pub use checkpoint::{CheckpointLayout, CheckpointStore, MemoryStore, SafetensorsStore};
pub use config::Config;
pub use embedding::{ImageTextEmbedder, OnnxClipEmbedder};
pub use error::{ConfigError, ModelError, ModelResult, OwlError, Result};
pub use model::{DetectionOutput, TextZeroShotDetector};
pub use output::{OutputFormat, OutputWriter};
pub use params::{Params, Variables};
pub use postprocess::{top_detections, BoundingBox, Detection};
pub use tokenizer::{ClipTokenizer, TextTokenizer};
pub use types::{DetectedObject, ImageDetections, PixelBox};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
