//! Configuration validation with range checks.

use crate::error::ConfigError;
use crate::output::OutputFormat;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let preset = self.model.body.preset()?;
        if let Some(size) = self.model.body.image_size {
            if size == 0 || size as usize % preset.patch_size != 0 {
                return Err(ConfigError::ValidationError(format!(
                    "model.body.image_size must be a positive multiple of the {} patch size ({}), got {size}",
                    preset.name, preset.patch_size
                )));
            }
        }
        if self.detection.max_query_length < 2 {
            return Err(ConfigError::ValidationError(
                "detection.max_query_length must be >= 2".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.detection.score_threshold) {
            return Err(ConfigError::ValidationError(
                "detection.score_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if self.detection.max_detections == 0 {
            return Err(ConfigError::ValidationError(
                "detection.max_detections must be > 0".into(),
            ));
        }
        if OutputFormat::parse(&self.output.format).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "output.format must be json or jsonl, got '{}'",
                self.output.format
            )));
        }
        Ok(())
    }
}
