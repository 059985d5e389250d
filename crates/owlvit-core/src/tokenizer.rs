//! Text query tokenization.
//!
//! Queries become fixed-length integer rows. Token id 0 means "no token", so a
//! row that starts with 0 is a padding query.

use std::path::Path;

use crate::error::{ModelError, ModelResult};

/// Start-of-text marker in CLIP vocabularies.
pub const START_OF_TEXT: &str = "<|startoftext|>";

/// End-of-text marker in CLIP vocabularies.
pub const END_OF_TEXT: &str = "<|endoftext|>";

/// Maps text to a fixed-length token sequence, zero-padded.
pub trait TextTokenizer: Send + Sync {
    fn tokenize(&self, text: &str, max_len: usize) -> ModelResult<Vec<i64>>;
}

/// CLIP byte-pair tokenizer loaded from a `tokenizer.json`.
pub struct ClipTokenizer {
    tokenizer: tokenizers::Tokenizer,
    start_id: i64,
    end_id: i64,
}

impl ClipTokenizer {
    /// Load from a Hugging Face `tokenizer.json`.
    pub fn from_file(path: &Path) -> ModelResult<Self> {
        if !path.exists() {
            return Err(ModelError::Tokenizer {
                message: format!("Tokenizer not found at {:?}", path),
            });
        }
        let tokenizer =
            tokenizers::Tokenizer::from_file(path).map_err(|e| ModelError::Tokenizer {
                message: format!("Failed to load tokenizer: {e}"),
            })?;
        tracing::debug!("Loaded tokenizer from {:?}", path);
        Self::from_tokenizer(tokenizer)
    }

    /// Wrap an already-built tokenizer; its vocabulary must contain the CLIP
    /// start and end markers.
    pub fn from_tokenizer(tokenizer: tokenizers::Tokenizer) -> ModelResult<Self> {
        let lookup = |token: &str| {
            tokenizer
                .token_to_id(token)
                .map(i64::from)
                .ok_or_else(|| ModelError::Tokenizer {
                    message: format!("Vocabulary has no {token} token"),
                })
        };
        let start_id = lookup(START_OF_TEXT)?;
        let end_id = lookup(END_OF_TEXT)?;

        Ok(Self {
            tokenizer,
            start_id,
            end_id,
        })
    }
}

impl TextTokenizer for ClipTokenizer {
    /// `[start, body…, end, 0, 0, …]`, the body truncated to `max_len - 2` tokens.
    fn tokenize(&self, text: &str, max_len: usize) -> ModelResult<Vec<i64>> {
        if max_len < 2 {
            return Err(ModelError::InvalidArgument(format!(
                "max_len must leave room for start and end tokens, got {max_len}"
            )));
        }

        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| ModelError::Tokenizer {
                message: format!("Tokenization failed for {text:?}: {e}"),
            })?;

        let mut tokens = Vec::with_capacity(max_len);
        tokens.push(self.start_id);
        tokens.extend(encoding.get_ids().iter().take(max_len - 2).map(|&id| i64::from(id)));
        tokens.push(self.end_id);
        tokens.resize(max_len, 0);
        Ok(tokens)
    }
}
