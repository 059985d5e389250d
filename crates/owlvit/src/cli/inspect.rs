//! The `owlvit inspect` command for looking inside checkpoints.

use clap::Args;
use owlvit_core::{Params, SafetensorsStore, TextZeroShotDetector};
use std::path::PathBuf;

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Checkpoint file (safetensors)
    #[arg(required = true)]
    pub checkpoint: PathBuf,

    /// Only list parameters under this dotted prefix (e.g. class_head)
    #[arg(short, long)]
    pub prefix: Option<String>,
}

/// Execute the inspect command.
pub async fn execute(args: InspectArgs) -> anyhow::Result<()> {
    let path = PathBuf::from(shellexpand::tilde(&args.checkpoint.to_string_lossy()).into_owned());
    if !path.is_file() {
        anyhow::bail!("Checkpoint does not exist: {:?}", path);
    }

    let variables = TextZeroShotDetector::load_variables(&SafetensorsStore::new(), &path)?;
    for line in describe(&variables.params, args.prefix.as_deref()) {
        println!("{line}");
    }
    Ok(())
}

/// One line per tensor (`path  [shape]`), then a total.
fn describe(params: &Params, prefix: Option<&str>) -> Vec<String> {
    let entries: Vec<_> = params
        .flatten()
        .into_iter()
        .filter(|(path, _)| prefix.map_or(true, |p| path == p || path.starts_with(&format!("{p}."))))
        .collect();

    let width = entries.iter().map(|(path, _)| path.len()).max().unwrap_or(0);
    let mut lines: Vec<String> = entries
        .iter()
        .map(|(path, tensor)| format!("{path:width$}  {:?}", tensor.shape()))
        .collect();

    let weights: usize = entries.iter().map(|(_, tensor)| tensor.len()).sum();
    lines.push(format!("{} tensors, {} weights", entries.len(), weights));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    fn zeros(shape: &[usize]) -> ArrayD<f32> {
        ArrayD::zeros(IxDyn(shape))
    }

    fn params() -> Params {
        Params::from_flat([
            ("class_head.dense0.kernel", zeros(&[4, 2])),
            ("class_head.dense0.bias", zeros(&[2])),
            ("obj_box_head.Dense_0.bias", zeros(&[4])),
        ])
        .unwrap()
    }

    #[test]
    fn test_describe_lists_every_tensor() {
        let lines = describe(&params(), None);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("class_head.dense0.bias"));
        assert!(lines[1].contains("[4, 2]"));
        assert_eq!(lines[3], "3 tensors, 14 weights");
    }

    #[test]
    fn test_describe_filters_by_prefix() {
        let lines = describe(&params(), Some("obj_box_head"));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "1 tensors, 4 weights");

        // A prefix matches whole path segments only.
        let lines = describe(&params(), Some("class"));
        assert_eq!(lines, vec!["0 tensors, 0 weights".to_string()]);
    }

    #[tokio::test]
    async fn test_execute_reads_saved_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.safetensors");

        let mut root = Params::tree();
        root.insert("params", params()).unwrap();
        SafetensorsStore::new().save(&path, &root).unwrap();

        let args = InspectArgs {
            checkpoint: path,
            prefix: None,
        };
        assert!(execute(args).await.is_ok());
    }
}
