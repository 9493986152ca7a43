//! Contracts for the pretrained encoder and its subword tokenizer.
//!
//! Span heads are generic over [`TokenEncoder`], so any Candle model that can
//! return its per-layer hidden states can drive them. Tokenization with word
//! alignment lives in [`tokenization`]; checkpoint naming in [`registry`].

pub mod errors;
pub mod registry;
pub mod tokenization;

use candle_core::{DType, Tensor, Var};

pub use errors::{EncoderError, Result};
pub use registry::{EncoderFamily, EncoderName};
pub use tokenization::{SubwordTokenizer, TokenizedBatch, TokenizedSentence};

/// Per-layer hidden states produced by one forward pass.
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    hidden_states: Vec<Tensor>,
}

impl EncoderOutput {
    /// Wraps transformer-layer outputs, each `(batch, seq, hidden)`.
    pub fn new(hidden_states: Vec<Tensor>) -> Result<Self> {
        let first = hidden_states
            .first()
            .ok_or_else(|| EncoderError::InvalidInput("encoder returned no layers".into()))?;
        for (layer, hidden) in hidden_states.iter().enumerate() {
            if hidden.rank() != 3 || hidden.dims() != first.dims() {
                return Err(EncoderError::InvalidInput(format!(
                    "layer {layer} has shape {:?}, expected (batch, seq, hidden) {:?}",
                    hidden.dims(),
                    first.dims()
                )));
            }
        }
        Ok(Self { hidden_states })
    }

    /// Like [`EncoderOutput::new`] for models that also return the embedding
    /// layer output first; that entry is dropped.
    pub fn with_embedding_layer(mut hidden_states: Vec<Tensor>) -> Result<Self> {
        if hidden_states.len() < 2 {
            return Err(EncoderError::InvalidInput(
                "expected embedding output followed by at least one layer".into(),
            ));
        }
        hidden_states.remove(0);
        Self::new(hidden_states)
    }

    pub fn hidden_states(&self) -> &[Tensor] {
        &self.hidden_states
    }

    pub fn num_layers(&self) -> usize {
        self.hidden_states.len()
    }

    pub fn last_layer(&self) -> &Tensor {
        // `new` guarantees at least one layer.
        &self.hidden_states[self.hidden_states.len() - 1]
    }
}

/// A pretrained encoder producing per-layer token embeddings.
pub trait TokenEncoder: Send + Sync {
    fn hidden_size(&self) -> usize;

    /// Number of transformer layers in [`EncoderOutput`].
    fn num_layers(&self) -> usize;

    fn pad_token_id(&self) -> u32;

    /// Encodes `(batch, seq)` token ids. `attention_mask` is `1` for real
    /// tokens and `0` for padding, with the same shape as `token_ids`.
    fn encode(&self, token_ids: &Tensor, attention_mask: &Tensor) -> Result<EncoderOutput>;

    /// Encoder weights exposed for fine-tuning; empty for a frozen encoder.
    fn named_parameters(&self) -> Vec<(String, Var)> {
        Vec::new()
    }
}

/// `1` where `token_ids` differs from `pad_token_id`, `0` elsewhere (`u8`).
pub fn attention_mask(token_ids: &Tensor, pad_token_id: u32) -> Result<Tensor> {
    if token_ids.rank() != 2 {
        return Err(EncoderError::InvalidInput(format!(
            "token ids must be shaped (batch, seq), got {:?}",
            token_ids.dims()
        )));
    }
    let ids = token_ids.to_dtype(DType::U32)?;
    Ok(ids.ne(pad_token_id)?)
}
