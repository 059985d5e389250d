//! Nested parameter trees.
//!
//! Parameters are addressed by hierarchical string keys (`class_head.dense0.kernel`)
//! and stored as a tree whose leaves are `f32` tensors of any rank.

use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::error::{ModelError, ModelResult};

/// Separator used in flattened parameter paths.
pub const PATH_SEPARATOR: char = '.';

/// A node of the parameter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    /// A weight tensor.
    Tensor(ArrayD<f32>),
    /// A named group of sub-trees.
    Tree(BTreeMap<String, Params>),
}

impl Default for Params {
    fn default() -> Self {
        Self::tree()
    }
}

impl From<ArrayD<f32>> for Params {
    fn from(tensor: ArrayD<f32>) -> Self {
        Self::Tensor(tensor)
    }
}

impl Params {
    /// An empty tree.
    pub fn tree() -> Self {
        Self::Tree(BTreeMap::new())
    }

    /// Build a tree from flattened `(path, tensor)` pairs.
    ///
    /// Fails when a path runs through an already inserted tensor, e.g. `a.b` then `a.b.c`.
    pub fn from_flat<I, K>(entries: I) -> ModelResult<Self>
    where
        I: IntoIterator<Item = (K, ArrayD<f32>)>,
        K: AsRef<str>,
    {
        let mut root = Self::tree();
        for (path, tensor) in entries {
            root.insert_path(path.as_ref(), Self::Tensor(tensor))?;
        }
        Ok(root)
    }

    /// Flatten the tree into `(path, tensor)` pairs in key order.
    pub fn flatten(&self) -> Vec<(String, &ArrayD<f32>)> {
        let mut out = Vec::new();
        self.flatten_into(String::new(), &mut out);
        out
    }

    fn flatten_into<'a>(&'a self, prefix: String, out: &mut Vec<(String, &'a ArrayD<f32>)>) {
        match self {
            Self::Tensor(t) => out.push((prefix, t)),
            Self::Tree(children) => {
                for (key, child) in children {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{prefix}{PATH_SEPARATOR}{key}")
                    };
                    child.flatten_into(path, out);
                }
            }
        }
    }

    /// Whether this node is a tree with a direct child named `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Direct child lookup.
    pub fn get(&self, key: &str) -> Option<&Params> {
        match self {
            Self::Tree(children) => children.get(key),
            Self::Tensor(_) => None,
        }
    }

    /// Direct mutable child lookup.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Params> {
        match self {
            Self::Tree(children) => children.get_mut(key),
            Self::Tensor(_) => None,
        }
    }

    /// Lookup by dotted path.
    pub fn get_path(&self, path: &str) -> Option<&Params> {
        path.split(PATH_SEPARATOR)
            .try_fold(self, |node, key| node.get(key))
    }

    /// Tensor at a dotted path, or a `MissingParameter` error naming the path.
    pub fn tensor_at(&self, path: &str) -> ModelResult<&ArrayD<f32>> {
        self.get_path(path)
            .and_then(Params::as_tensor)
            .ok_or_else(|| ModelError::MissingParameter(path.to_string()))
    }

    /// The tensor held by a leaf.
    pub fn as_tensor(&self) -> Option<&ArrayD<f32>> {
        match self {
            Self::Tensor(t) => Some(t),
            Self::Tree(_) => None,
        }
    }

    /// Insert a direct child, returning the previous value.
    ///
    /// Fails on a leaf node.
    pub fn insert(&mut self, key: impl Into<String>, value: Params) -> ModelResult<Option<Params>> {
        match self {
            Self::Tree(children) => Ok(children.insert(key.into(), value)),
            Self::Tensor(_) => Err(ModelError::InvalidArgument(
                "cannot insert a child into a tensor leaf".to_string(),
            )),
        }
    }

    /// Insert at a dotted path, creating intermediate trees.
    pub fn insert_path(&mut self, path: &str, value: Params) -> ModelResult<Option<Params>> {
        let mut keys: Vec<&str> = path.split(PATH_SEPARATOR).collect();
        let last = keys.pop().filter(|k| !k.is_empty()).ok_or_else(|| {
            ModelError::InvalidArgument(format!("invalid parameter path '{path}'"))
        })?;

        let mut node = self;
        for key in keys {
            node = match node {
                Self::Tree(children) => children.entry(key.to_string()).or_insert_with(Self::tree),
                Self::Tensor(_) => {
                    return Err(ModelError::InvalidArgument(format!(
                        "parameter path '{path}' passes through a tensor"
                    )))
                }
            };
        }
        node.insert(last, value)
    }

    /// Remove a direct child, returning it. Absent keys are not an error.
    pub fn remove(&mut self, key: &str) -> Option<Params> {
        match self {
            Self::Tree(children) => children.remove(key),
            Self::Tensor(_) => None,
        }
    }

    /// Take a direct child out of the tree by value.
    pub fn into_child(self, key: &str) -> Option<Params> {
        match self {
            Self::Tree(mut children) => children.remove(key),
            Self::Tensor(_) => None,
        }
    }

    /// Overlay `other` onto `self`: leaves in `other` replace leaves in `self`,
    /// trees are merged recursively, everything else in `self` is kept.
    pub fn merge(&mut self, other: Params) {
        match (self, other) {
            (Self::Tree(mine), Self::Tree(theirs)) => {
                for (key, value) in theirs {
                    match mine.get_mut(&key) {
                        Some(existing) => existing.merge(value),
                        None => {
                            mine.insert(key, value);
                        }
                    }
                }
            }
            (slot, other) => *slot = other,
        }
    }

    /// Total number of scalar weights in the tree.
    pub fn num_weights(&self) -> usize {
        self.flatten().iter().map(|(_, t)| t.len()).sum()
    }
}

/// Model variables under the canonical `params` collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    pub params: Params,
}

impl Variables {
    pub fn new(params: Params) -> Self {
        Self { params }
    }
}
