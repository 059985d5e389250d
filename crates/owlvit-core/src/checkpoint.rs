//! Checkpoint stores and checkpoint lineages.
//!
//! A store restores a path into a [`Params`] tree. Two lineages of detector
//! checkpoints exist: older ones keep the weights under `optimizer.target`,
//! newer ones under `params`. [`CheckpointLayout`] tells them apart once, at
//! load time.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use memmap2::Mmap;
use ndarray::{ArrayD, IxDyn};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::error::{ConfigError, ModelError, ModelResult};
use crate::params::Params;

/// Restores parameter trees from persistent storage.
pub trait CheckpointStore: Send + Sync {
    /// Read the checkpoint at `path` into a parameter tree.
    fn restore(&self, path: &Path) -> ModelResult<Params>;
}

/// Safetensors files whose tensor names are dotted parameter paths
/// (`optimizer.target.class_head.dense0.kernel`).
///
/// Reads F32, F64 and BF16 tensors (converted to `f32`), writes F32.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafetensorsStore;

impl SafetensorsStore {
    pub fn new() -> Self {
        Self
    }

    /// Write a parameter tree as a safetensors file.
    pub fn save(&self, path: &Path, params: &Params) -> ModelResult<()> {
        let flat = params.flatten();
        let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = flat
            .iter()
            .map(|(name, tensor)| {
                let bytes = tensor.iter().flat_map(|v| v.to_le_bytes()).collect();
                (name.clone(), tensor.shape().to_vec(), bytes)
            })
            .collect();

        let views = buffers
            .iter()
            .map(|(name, shape, bytes)| {
                TensorView::new(Dtype::F32, shape.clone(), bytes).map(|view| (name.as_str(), view))
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| checkpoint_error(path, format!("Invalid tensor: {e}")))?;

        let serialized = safetensors::serialize(views.iter().map(|(n, v)| (*n, v)), &None)
            .map_err(|e| checkpoint_error(path, format!("Failed to serialize: {e}")))?;
        std::fs::write(path, serialized)
            .map_err(|e| checkpoint_error(path, format!("Failed to write: {e}")))?;

        tracing::debug!("Saved {} tensors to {:?}", flat.len(), path);
        Ok(())
    }
}

impl CheckpointStore for SafetensorsStore {
    fn restore(&self, path: &Path) -> ModelResult<Params> {
        let file = File::open(path)
            .map_err(|e| checkpoint_error(path, format!("Failed to open: {e}")))?;
        // Memory-map instead of reading: backbone checkpoints run to hundreds of MB.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| checkpoint_error(path, format!("Failed to map: {e}")))?;

        let tensors = SafeTensors::deserialize(&mmap)
            .map_err(|e| checkpoint_error(path, format!("Failed to parse safetensors: {e}")))?;

        let mut entries = Vec::with_capacity(tensors.len());
        for (name, view) in tensors.tensors() {
            let array = tensor_to_array(&view)
                .map_err(|message| checkpoint_error(path, format!("{name}: {message}")))?;
            entries.push((name, array));
        }

        tracing::debug!("Restored {} tensors from {:?}", entries.len(), path);
        Params::from_flat(entries)
    }
}

fn tensor_to_array(view: &TensorView<'_>) -> Result<ArrayD<f32>, String> {
    let data = view.data();
    let values: Vec<f32> = match view.dtype() {
        Dtype::F32 => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        Dtype::F64 => data
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32)
            .collect(),
        // bf16 is the upper half of an f32.
        Dtype::BF16 => data
            .chunks_exact(2)
            .map(|b| f32::from_bits((u16::from_le_bytes([b[0], b[1]]) as u32) << 16))
            .collect(),
        other => return Err(format!("unsupported dtype {other:?}")),
    };
    ArrayD::from_shape_vec(IxDyn(view.shape()), values).map_err(|e| e.to_string())
}

fn checkpoint_error(path: &Path, message: String) -> ModelError {
    ModelError::Checkpoint {
        path: path.to_path_buf(),
        message,
    }
}

/// In-process store, keyed by path. Useful for tests and for handing
/// already-built trees to the loader.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<PathBuf, Params>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tree under `path`, replacing any previous one.
    pub fn insert(&self, path: impl Into<PathBuf>, params: Params) {
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.insert(path.into(), params);
    }
}

impl CheckpointStore for MemoryStore {
    fn restore(&self, path: &Path) -> ModelResult<Params> {
        let entries = self
            .entries
            .read()
            .map_err(|e| checkpoint_error(path, format!("Store lock poisoned: {e}")))?;
        entries
            .get(path)
            .cloned()
            .ok_or_else(|| checkpoint_error(path, "No such checkpoint".to_string()))
    }
}

/// Top-level key of checkpoints that store parameters directly.
pub const PARAMS_KEY: &str = "params";

/// Top-level key of older, optimizer-wrapped checkpoints.
pub const OPTIMIZER_KEY: &str = "optimizer";

/// Key under [`OPTIMIZER_KEY`] holding the parameters.
pub const TARGET_KEY: &str = "target";

/// A restored detector checkpoint, by lineage.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointLayout {
    /// Parameters stored directly under `params`.
    Current(Params),
    /// Parameters nested under `optimizer.target`.
    Legacy(Params),
}

impl CheckpointLayout {
    /// Classify a restored tree. `params` wins when both keys are present.
    pub fn resolve(restored: Params, path: &Path) -> Result<Self, ConfigError> {
        if restored.contains(PARAMS_KEY) {
            let params = restored.into_child(PARAMS_KEY).unwrap_or_default();
            return Ok(Self::Current(params));
        }
        Self::resolve_legacy_or_fail(restored, path)
    }

    /// Classify a restored tree for detector initialization.
    /// `optimizer.target` wins when both keys are present.
    pub fn resolve_for_init(restored: Params, path: &Path) -> Result<Self, ConfigError> {
        if restored.contains(OPTIMIZER_KEY) {
            return Self::resolve_legacy_or_fail(restored, path);
        }
        Self::resolve(restored, path)
    }

    fn resolve_legacy_or_fail(restored: Params, path: &Path) -> Result<Self, ConfigError> {
        if let Some(optimizer) = restored.into_child(OPTIMIZER_KEY) {
            return optimizer
                .into_child(TARGET_KEY)
                .map(Self::Legacy)
                .ok_or_else(|| ConfigError::MalformedCheckpoint {
                    path: path.to_path_buf(),
                    message: format!("'{OPTIMIZER_KEY}' has no '{TARGET_KEY}'"),
                });
        }

        Err(ConfigError::MalformedCheckpoint {
            path: path.to_path_buf(),
            message: format!("neither '{PARAMS_KEY}' nor '{OPTIMIZER_KEY}.{TARGET_KEY}' found"),
        })
    }

    pub fn lineage(&self) -> &'static str {
        match self {
            Self::Current(_) => "params",
            Self::Legacy(_) => "optimizer.target",
        }
    }

    pub fn into_params(self) -> Params {
        match self {
            Self::Current(p) | Self::Legacy(p) => p,
        }
    }
}
