//! Parameter initialization from checkpoints.
//!
//! Two modes, chosen by `init.codebase`:
//! - `clip`: only the `backbone` subtree is replaced, through the embedder's
//!   own checkpoint reader. Every other subtree is kept as supplied.
//! - unset: the whole tree is replaced by a restored detector checkpoint.
//!   `optimizer.target` is taken over `params` when a checkpoint has both.

use std::path::Path;

use crate::checkpoint::{CheckpointLayout, CheckpointStore};
use crate::config::{Codebase, InitConfig};
use crate::embedding::ImageTextEmbedder;
use crate::error::Result;
use crate::heads::{BACKBONE_SCOPE, CLASS_HEAD_SCOPE};
use crate::params::Params;

/// Class head entries left behind by a removed feature in older checkpoints.
pub const STALE_CLASS_HEAD_KEYS: [&str; 2] = ["padding", "padding_bias"];

/// Produce the parameter tree the detector will run with.
pub fn load(
    params: Params,
    init: &InitConfig,
    store: &dyn CheckpointStore,
    embedder: &dyn ImageTextEmbedder,
) -> Result<Params> {
    let checkpoint_path = init.resolved_checkpoint_path()?;

    match init.codebase {
        Some(Codebase::Clip) => load_backbone(params, &checkpoint_path, embedder),
        None => restore_detector(store, &checkpoint_path),
    }
}

fn load_backbone(
    mut params: Params,
    checkpoint_path: &Path,
    embedder: &dyn ImageTextEmbedder,
) -> Result<Params> {
    tracing::info!("Loading backbone weights from {:?}", checkpoint_path);
    let backbone = params.remove(BACKBONE_SCOPE).unwrap_or_default();
    let backbone = embedder.load_backbone(backbone, checkpoint_path)?;
    params.insert(BACKBONE_SCOPE, backbone)?;
    Ok(params)
}

fn restore_detector(store: &dyn CheckpointStore, checkpoint_path: &Path) -> Result<Params> {
    tracing::info!("Restoring detector checkpoint {:?}", checkpoint_path);
    let restored = store.restore(checkpoint_path)?;

    match CheckpointLayout::resolve_for_init(restored, checkpoint_path)? {
        CheckpointLayout::Legacy(mut params) => {
            strip_stale_keys(&mut params);
            Ok(params)
        }
        CheckpointLayout::Current(params) => Ok(params),
    }
}

fn strip_stale_keys(params: &mut Params) {
    let Some(class_head) = params.get_mut(CLASS_HEAD_SCOPE) else {
        return;
    };
    for key in STALE_CLASS_HEAD_KEYS {
        if class_head.remove(key).is_some() {
            tracing::debug!("Dropped stale parameter {CLASS_HEAD_SCOPE}.{key}");
        }
    }
}
