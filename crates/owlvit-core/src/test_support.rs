//! Deterministic fixtures shared by unit tests.

use std::path::Path;

use ndarray::{Array2, Array3, ArrayD, ArrayView2, ArrayView4, Axis, IxDyn};

use crate::embedding::{Embeddings, ImageTextEmbedder};
use crate::error::ModelResult;
use crate::heads::{BOX_COORDS, BOX_HEAD_SCOPE, CLASS_HEAD_SCOPE};
use crate::params::Params;
use crate::tokenizer::ClipTokenizer;

/// Small pseudo-random values in roughly [-0.1, 0.1], fixed by `seed`.
fn values(len: usize, seed: u64) -> Vec<f32> {
    (0..len)
        .map(|i| ((i as f32 * 0.731 + seed as f32 * 1.37).sin() * 0.1))
        .collect()
}

fn tensor(shape: &[usize], seed: u64) -> Params {
    let len = shape.iter().product();
    Params::Tensor(ArrayD::from_shape_vec(IxDyn(shape), values(len, seed)).unwrap())
}

/// `[b, p, d]` features.
pub(crate) fn features(b: usize, p: usize, d: usize, seed: u64) -> Array3<f32> {
    Array3::from_shape_vec((b, p, d), values(b * p * d, seed)).unwrap()
}

fn dense(params: &mut Params, scope: &str, in_dim: usize, out_dim: usize, seed: u64) {
    params
        .insert_path(&format!("{scope}.kernel"), tensor(&[in_dim, out_dim], seed))
        .unwrap();
    params
        .insert_path(&format!("{scope}.bias"), tensor(&[out_dim], seed + 1))
        .unwrap();
}

/// Class head weights under `class_head`.
pub(crate) fn class_head_params(in_dim: usize, embed_dim: usize, seed: u64) -> Params {
    let mut params = Params::tree();
    add_class_head(&mut params, in_dim, embed_dim, seed);
    params
}

/// Box head weights under `obj_box_head`: two hidden layers of width `in_dim`.
pub(crate) fn box_head_params(in_dim: usize, seed: u64) -> Params {
    let mut params = Params::tree();
    add_box_head(&mut params, in_dim, seed);
    params
}

fn add_class_head(params: &mut Params, in_dim: usize, embed_dim: usize, seed: u64) {
    dense(params, &format!("{CLASS_HEAD_SCOPE}.dense0"), in_dim, embed_dim, seed);
    dense(params, &format!("{CLASS_HEAD_SCOPE}.logit_shift"), in_dim, 1, seed + 10);
    dense(params, &format!("{CLASS_HEAD_SCOPE}.logit_scale"), in_dim, 1, seed + 20);
}

fn add_box_head(params: &mut Params, in_dim: usize, seed: u64) {
    dense(params, &format!("{BOX_HEAD_SCOPE}.Dense_0"), in_dim, in_dim, seed);
    dense(params, &format!("{BOX_HEAD_SCOPE}.Dense_1"), in_dim, in_dim, seed + 10);
    dense(params, &format!("{BOX_HEAD_SCOPE}.Dense_2"), in_dim, BOX_COORDS, seed + 20);
}

/// Both heads plus a one-tensor backbone, as a detector checkpoint holds them.
pub(crate) fn detector_params(in_dim: usize, embed_dim: usize) -> Params {
    let mut params = Params::tree();
    add_class_head(&mut params, in_dim, embed_dim, 1);
    add_box_head(&mut params, in_dim, 2);
    params
        .insert_path("backbone.proj", tensor(&[in_dim, embed_dim], 3))
        .unwrap();
    params
}

/// Whitespace word-level tokenizer over a tiny CLIP-style vocabulary.
pub(crate) fn word_tokenizer() -> ClipTokenizer {
    let json = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {
                "<pad>": 0,
                "<|startoftext|>": 1,
                "<|endoftext|>": 2,
                "a": 3,
                "photo": 4,
                "of": 5,
                "cat": 6,
                "dog": 7,
                "<unk>": 8
            },
            "unk_token": "<unk>"
        }
    }"#;
    let tokenizer = tokenizers::Tokenizer::from_bytes(json.as_bytes()).unwrap();
    ClipTokenizer::from_tokenizer(tokenizer).unwrap()
}

/// Embedder with no weights: image tokens are per-patch channel means,
/// text embeddings are functions of the token ids.
pub(crate) struct FixedEmbedder {
    pub patch_size: usize,
    pub image_dim: usize,
    pub text_dim: usize,
}

impl ImageTextEmbedder for FixedEmbedder {
    fn embed(
        &self,
        images: Option<ArrayView4<'_, f32>>,
        texts: Option<ArrayView2<'_, i64>>,
        _train: bool,
    ) -> ModelResult<Embeddings> {
        let image = images.map(|images| {
            let (b, h, w, _) = images.dim();
            let (gh, gw) = (h / self.patch_size, w / self.patch_size);
            Array3::from_shape_fn((b, gh * gw, self.image_dim), |(bi, t, k)| {
                let (gy, gx) = (t / gw, t % gw);
                let pixel = images[[bi, gy * self.patch_size, gx * self.patch_size, k % 3]];
                pixel * 0.1 + ((t + k) as f32 * 0.37).cos() * 0.05
            })
        });
        let text = texts.map(|texts| {
            let n = texts.len_of(Axis(0));
            Array2::from_shape_fn((n, self.text_dim), |(row, k)| {
                let id = texts[[row, 1.min(texts.ncols() - 1)]] as f32;
                ((id + 1.0) * (k as f32 + 1.0) * 0.13).sin()
            })
        });
        Ok(Embeddings { image, text })
    }

    fn load_backbone(&self, mut params: Params, checkpoint_path: &Path) -> ModelResult<Params> {
        let marker = checkpoint_path.to_string_lossy().len() as f32;
        params.insert(
            "loaded_from",
            Params::Tensor(ArrayD::from_elem(IxDyn(&[1]), marker)),
        )?;
        Ok(params)
    }
}
