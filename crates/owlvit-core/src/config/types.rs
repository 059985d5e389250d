//! Sub-configuration structs with defaults for the released OWL-ViT checkpoints.

use crate::box_bias::BoxBiasKind;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// General settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory where models are stored
    pub model_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("~/.owlvit/models"),
        }
    }
}

/// An image-text backbone architecture preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantPreset {
    /// Preset name as written in config files
    pub name: &'static str,
    /// Width of the joint image-text embedding space
    pub embed_dim: usize,
    /// Vision transformer patch size in pixels
    pub patch_size: usize,
    /// Native detector input size (square)
    pub image_size: u32,
}

/// Known backbone presets.
pub const VARIANTS: &[VariantPreset] = &[
    VariantPreset {
        name: "vit_b32",
        embed_dim: 512,
        patch_size: 32,
        image_size: 768,
    },
    VariantPreset {
        name: "vit_b16",
        embed_dim: 512,
        patch_size: 16,
        image_size: 768,
    },
    VariantPreset {
        name: "vit_l14",
        embed_dim: 768,
        patch_size: 14,
        image_size: 840,
    },
    VariantPreset {
        name: "vit_l14_336",
        embed_dim: 768,
        patch_size: 14,
        image_size: 1008,
    },
];

impl VariantPreset {
    /// Look up a preset by name.
    pub fn by_name(name: &str) -> Result<&'static VariantPreset, ConfigError> {
        VARIANTS
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| ConfigError::UnknownVariant(name.to_string()))
    }
}

/// Image-text embedder ("body") settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyConfig {
    /// Architecture preset ("vit_b32", "vit_b16", "vit_l14", "vit_l14_336")
    pub variant: String,

    /// Vision tower ONNX filename, relative to the model directory
    pub vision_model: String,

    /// Text tower ONNX filename, relative to the model directory
    pub text_model: String,

    /// Tokenizer filename, relative to the model directory
    pub tokenizer: String,

    /// Name of the vision output holding per-patch embeddings
    pub image_output: String,

    /// Name of the text output holding per-query embeddings
    pub text_output: String,

    /// Override of the preset's input size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_size: Option<u32>,
}

impl Default for BodyConfig {
    fn default() -> Self {
        Self {
            variant: "vit_b32".to_string(),
            vision_model: "vision_model.onnx".to_string(),
            text_model: "text_model.onnx".to_string(),
            tokenizer: "tokenizer.json".to_string(),
            image_output: "image_embeds".to_string(),
            text_output: "text_embeds".to_string(),
            image_size: None,
        }
    }
}

impl BodyConfig {
    /// Resolve the architecture preset.
    pub fn preset(&self) -> Result<&'static VariantPreset, ConfigError> {
        VariantPreset::by_name(&self.variant)
    }

    /// Input size for preprocessing: the override if set, else the preset's.
    pub fn input_size(&self) -> Result<u32, ConfigError> {
        match self.image_size {
            Some(size) => Ok(size),
            None => Ok(self.preset()?.image_size),
        }
    }
}

/// Detection model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// L2-normalize class and query embeddings before computing logits
    pub normalize: bool,

    /// Geometric prior added to box regression
    pub box_bias: BoxBiasKind,

    /// Image-text embedder settings
    pub body: BodyConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            box_bias: BoxBiasKind::Both,
            body: BodyConfig::default(),
        }
    }
}

/// Where initial parameters come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codebase {
    /// Only the backbone, from an external CLIP checkpoint
    Clip,
}

/// Parameter initialization settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    /// Set to "clip" to replace only the backbone; unset restores everything
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codebase: Option<Codebase>,

    /// Checkpoint to restore from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<PathBuf>,
}

impl InitConfig {
    /// Checkpoint path with ~ expanded.
    pub fn resolved_checkpoint_path(&self) -> Result<PathBuf, ConfigError> {
        let path = self
            .checkpoint_path
            .as_ref()
            .ok_or(ConfigError::MissingCheckpointPath)?;
        let path_str = path.to_string_lossy();
        Ok(PathBuf::from(shellexpand::tilde(&path_str).into_owned()))
    }
}

/// Query and result settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Token length of each text query, including start/end tokens
    pub max_query_length: usize,

    /// Minimum sigmoid score for a detection to be reported
    pub score_threshold: f32,

    /// Maximum detections reported per image
    pub max_detections: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            max_query_length: 16,
            score_threshold: 0.1,
            max_detections: 100,
        }
    }
}

/// Output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Default output format ("json" or "jsonl")
    pub format: String,

    /// Pretty-print JSON output
    pub pretty: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
            pretty: false,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    pub level: String,

    /// Log format: "pretty" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
