//! The `owlvit detect` command.

use clap::{Args, ValueEnum};
use owlvit_core::embedding::{load_image, preprocess};
use owlvit_core::output::OutputFormat as CoreOutputFormat;
use owlvit_core::{
    Config, DetectedObject, ImageDetections, OnnxClipEmbedder, OutputWriter, TextZeroShotDetector,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Arguments for the `detect` command.
#[derive(Args, Debug)]
pub struct DetectArgs {
    /// Image file(s) to search
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    /// Text query; repeat for several (-q "a cat" -q "a remote control")
    #[arg(short = 'q', long = "query", required = true)]
    pub queries: Vec<String>,

    /// Detector checkpoint (overrides init.checkpoint_path)
    #[arg(long, env = "OWLVIT_CHECKPOINT")]
    pub checkpoint: Option<PathBuf>,

    /// Minimum score for a detection to be reported
    #[arg(short, long)]
    pub threshold: Option<f32>,

    /// Maximum detections per image
    #[arg(short = 'n', long)]
    pub max_detections: Option<usize>,

    /// Output file (defaults to stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format (defaults to output.format)
    #[arg(short, long, value_enum)]
    pub format: Option<OutputFormat>,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,
}

/// Supported output formats.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    /// A JSON object per image, or an array for several images
    Json,
    /// One JSON object per line
    Jsonl,
}

impl From<OutputFormat> for CoreOutputFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Json => CoreOutputFormat::Json,
            OutputFormat::Jsonl => CoreOutputFormat::JsonLines,
        }
    }
}

/// Execute the detect command.
pub async fn execute(args: DetectArgs) -> anyhow::Result<()> {
    for image in &args.images {
        if !image.is_file() {
            anyhow::bail!(
                "Image does not exist: {:?}\n\n  Hint: Check the file path and try again.",
                image
            );
        }
    }

    let config = apply_overrides(Config::load()?, &args)?;
    if !OnnxClipEmbedder::model_exists(&config.model.body, &config.model_dir()) {
        anyhow::bail!(
            "Model files not found in {:?}\n\n  Hint: Run `owlvit models list` to see what is missing.",
            config.model_dir()
        );
    }

    let format = match args.format {
        Some(format) => format.into(),
        None => CoreOutputFormat::parse(&config.output.format).unwrap_or(CoreOutputFormat::Json),
    };
    let pretty = args.pretty || config.output.pretty;

    // Model loading and inference are CPU-bound.
    let images = args.images.clone();
    let queries = args.queries.clone();
    let records =
        tokio::task::spawn_blocking(move || run_detection(&config, &images, &queries)).await??;

    match &args.output {
        Some(path) => {
            let file = File::create(path)?;
            OutputWriter::new(BufWriter::new(file), format, pretty).write_records(&records)?;
            tracing::info!("Output written to {:?}", path);
        }
        None => {
            let stdout = std::io::stdout();
            OutputWriter::new(stdout.lock(), format, pretty).write_records(&records)?;
        }
    }

    Ok(())
}

/// Fold CLI flags into the loaded configuration.
fn apply_overrides(mut config: Config, args: &DetectArgs) -> anyhow::Result<Config> {
    if let Some(checkpoint) = &args.checkpoint {
        let expanded = shellexpand::tilde(&checkpoint.to_string_lossy()).into_owned();
        config.init.checkpoint_path = Some(PathBuf::from(expanded));
    }

    if let Some(threshold) = args.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            anyhow::bail!("--threshold must be between 0.0 and 1.0, got {threshold}");
        }
        config.detection.score_threshold = threshold;
    }

    if let Some(max_detections) = args.max_detections {
        if max_detections == 0 {
            anyhow::bail!("--max-detections must be > 0");
        }
        config.detection.max_detections = max_detections;
    }

    if config.init.checkpoint_path.is_none() {
        anyhow::bail!(
            "No checkpoint configured.\n\n  Hint: Pass --checkpoint or set init.checkpoint_path \
             (see `owlvit config path`)."
        );
    }

    Ok(config)
}

fn run_detection(
    config: &Config,
    images: &[PathBuf],
    queries: &[String],
) -> anyhow::Result<Vec<ImageDetections>> {
    let detector = TextZeroShotDetector::from_config(config)?;
    let input_size = config.model.body.input_size()?;

    images
        .iter()
        .map(|path| {
            let image = load_image(path)?;
            let input = preprocess(&image, input_size);
            let detections = detector.detect(&input, queries, &config.detection)?;
            tracing::info!("{}: {} detection(s)", path.display(), detections.len());

            Ok(ImageDetections {
                file_path: path.clone(),
                file_name: file_name(path),
                width: input.width,
                height: input.height,
                queries: queries.to_vec(),
                detections: detections
                    .iter()
                    .map(|d| DetectedObject::from_detection(d, queries, input.width, input.height))
                    .collect(),
            })
        })
        .collect()
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> DetectArgs {
        DetectArgs {
            images: vec![PathBuf::from("cat.jpg")],
            queries: vec!["a cat".to_string()],
            checkpoint: Some(PathBuf::from("/ckpt/owlvit.safetensors")),
            threshold: None,
            max_detections: None,
            output: None,
            format: None,
            pretty: false,
        }
    }

    #[test]
    fn test_overrides_replace_config_values() {
        let mut a = args();
        a.threshold = Some(0.3);
        a.max_detections = Some(7);
        let config = apply_overrides(Config::default(), &a).unwrap();

        assert_eq!(config.detection.score_threshold, 0.3);
        assert_eq!(config.detection.max_detections, 7);
        assert_eq!(
            config.init.checkpoint_path,
            Some(PathBuf::from("/ckpt/owlvit.safetensors"))
        );
    }

    #[test]
    fn test_overrides_reject_bad_threshold() {
        let mut a = args();
        a.threshold = Some(1.5);
        assert!(apply_overrides(Config::default(), &a).is_err());
    }

    #[test]
    fn test_overrides_require_a_checkpoint() {
        let mut a = args();
        a.checkpoint = None;
        let err = apply_overrides(Config::default(), &a).unwrap_err();
        assert!(err.to_string().contains("checkpoint"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name(Path::new("/photos/cat.jpg")), "cat.jpg");
        assert_eq!(file_name(Path::new("/")), "");
    }
}
