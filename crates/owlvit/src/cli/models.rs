//! The `owlvit models` command for checking installed model files.

use clap::{Args, Subcommand};
use owlvit_core::{Config, OnnxClipEmbedder};
use std::path::{Path, PathBuf};

/// Arguments for the `models` command.
#[derive(Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommand,
}

/// Subcommands for model management.
#[derive(Subcommand, Debug)]
pub enum ModelsCommand {
    /// List required model files and whether they are present
    List,

    /// Show model directory path
    Path,
}

/// One file the detector needs.
struct ModelFile {
    role: &'static str,
    path: PathBuf,
}

impl ModelFile {
    fn status(&self) -> &'static str {
        if self.path.exists() {
            "ready"
        } else {
            "not installed"
        }
    }
}

/// Every file `owlvit detect` loads, for the current configuration.
fn required_files(config: &Config) -> Vec<ModelFile> {
    let model_dir = config.model_dir();
    let body = &config.model.body;
    let [vision, text] = OnnxClipEmbedder::model_paths(body, &model_dir);

    let mut files = vec![
        ModelFile {
            role: "vision tower",
            path: vision,
        },
        ModelFile {
            role: "text tower",
            path: text,
        },
        ModelFile {
            role: "tokenizer",
            path: model_dir.join(&body.tokenizer),
        },
    ];
    if let Ok(checkpoint) = config.init.resolved_checkpoint_path() {
        files.push(ModelFile {
            role: "checkpoint",
            path: checkpoint,
        });
    }
    files
}

/// Execute the models command.
pub async fn execute(args: ModelsArgs) -> anyhow::Result<()> {
    let config = Config::load()?;

    match args.command {
        ModelsCommand::List => {
            let model_dir = config.model_dir();
            println!("Model files ({}):", config.model.body.variant);
            println!("  Directory: {}\n", model_dir.display());

            for file in required_files(&config) {
                println!(
                    "    - {:14} {:14} {}",
                    file.role,
                    file.status(),
                    display_relative(&file.path, &model_dir)
                );
            }
            if config.init.checkpoint_path.is_none() {
                println!(
                    "    - {:14} {:14} set init.checkpoint_path or pass --checkpoint",
                    "checkpoint", "not configured"
                );
            }
        }

        ModelsCommand::Path => {
            println!("{}", config.model_dir().display());
        }
    }

    Ok(())
}

fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .display()
        .to_string()
}
