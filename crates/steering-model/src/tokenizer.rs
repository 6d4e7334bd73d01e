//! Tokenization is an out-of-scope external collaborator; this module
//! only adapts whatever tokenizer a `SteeringModel` was built with to
//! the narrow encode/decode surface generation needs.

use crate::error::SteeringModelError;

pub trait PromptTokenizer: std::fmt::Debug + Send + Sync {
    fn encode(&self, text: &str, max_length: usize) -> Result<Vec<u32>, SteeringModelError>;
    fn decode(&self, ids: &[u32]) -> String;
    fn vocab_size(&self) -> usize;
}

/// Wraps a real HuggingFace tokenizer, as loaded by `from_pretrained`.
#[derive(Debug)]
pub struct HuggingFaceTokenizer(pub tokenizers::Tokenizer);

impl PromptTokenizer for HuggingFaceTokenizer {
    fn encode(&self, text: &str, max_length: usize) -> Result<Vec<u32>, SteeringModelError> {
        let encoding = self
            .0
            .encode(text, true)
            .map_err(|e| SteeringModelError::External(anyhow::anyhow!(e)))?;
        let mut ids = encoding.get_ids().to_vec();
        ids.truncate(max_length);
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> String {
        self.0.decode(ids, true).unwrap_or_default()
    }

    fn vocab_size(&self) -> usize {
        self.0.get_vocab_size(true)
    }
}

/// Byte-level tokenizer with no learned vocabulary, used by
/// [`crate::SteeringModel::from_components`] so tests and callers can
/// exercise the full pipeline without a real tokenizer model. Ids are
/// raw byte values modulo `vocab_size`; decoding a generated sequence
/// back to readable text is not a goal of the synthetic harness.
#[derive(Debug)]
pub struct ByteTokenizer {
    vocab_size: usize,
}

impl ByteTokenizer {
    pub fn new(vocab_size: usize) -> Self {
        Self { vocab_size }
    }
}

impl PromptTokenizer for ByteTokenizer {
    fn encode(&self, text: &str, max_length: usize) -> Result<Vec<u32>, SteeringModelError> {
        let ids = text
            .bytes()
            .take(max_length)
            .map(|b| b as u32 % self.vocab_size as u32)
            .collect();
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> String {
        let bytes: Vec<u8> = ids.iter().map(|&id| (id % 256) as u8).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}
