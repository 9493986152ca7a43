//! Subword tokenization with word alignment.
//!
//! Wraps a `tokenizers::Tokenizer`. Pre-tokenized sentences are encoded word by
//! word so every subword knows its owning word; special tokens added by the
//! post-processor map to the `-1` sentinel. Batches are right-padded with the
//! pad token id, and their subword maps with `-1`.

use std::{collections::HashMap, path::Path};

use candle_core::{Device, Tensor};
use spans::{SubwordMap, SENTINEL};
use tokenizers::{processors::template::TemplateProcessing, Encoding, Tokenizer};

use crate::errors::{EncoderError, Result};

/// Token ids and subword-to-word map for one sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedSentence {
    pub ids: Vec<u32>,
    pub subword_map: SubwordMap,
}

impl TokenizedSentence {
    /// Number of leading special tokens before the first word piece.
    pub fn start_shift(&self) -> usize {
        self.subword_map
            .as_slice()
            .iter()
            .take_while(|&&entry| entry == SENTINEL)
            .count()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Padded batch of tokenized sentences.
#[derive(Debug, Clone)]
pub struct TokenizedBatch {
    /// `(batch, max_len)` `u32` token ids.
    pub token_ids: Tensor,
    /// `(batch,)` `u32` unpadded lengths.
    pub lengths: Tensor,
    /// `(batch, max_len)` `i64` subword maps, present for word-aligned batches.
    pub subword_maps: Option<Tensor>,
}

/// Subword tokenizer that tracks word ownership.
#[derive(Clone)]
pub struct SubwordTokenizer {
    inner: Tokenizer,
    pad_token_id: u32,
}

impl std::fmt::Debug for SubwordTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubwordTokenizer")
            .field("vocab_size", &self.inner.get_vocab_size(true))
            .field("pad_token_id", &self.pad_token_id)
            .finish()
    }
}

impl SubwordTokenizer {
    /// Wraps a configured tokenizer; `pad_token` must be in its vocabulary.
    pub fn new(inner: Tokenizer, pad_token: &str) -> Result<Self> {
        let pad_token_id = inner
            .token_to_id(pad_token)
            .ok_or_else(|| EncoderError::MissingSpecialToken(pad_token.to_string()))?;
        log::info!(
            "subword tokenizer ready: vocab={} pad={}({})",
            inner.get_vocab_size(true),
            pad_token,
            pad_token_id
        );
        Ok(Self {
            inner,
            pad_token_id,
        })
    }

    /// Loads a serialized `tokenizer.json`.
    pub fn from_file(path: impl AsRef<Path>, pad_token: &str) -> Result<Self> {
        let path = path.as_ref();
        let inner = Tokenizer::from_file(path)?;
        log::debug!("loaded tokenizer from {}", path.display());
        Self::new(inner, pad_token)
    }

    /// Installs a `bos $A eos` template for single sequences (and
    /// `bos $A eos $B eos` for pairs), e.g. `[CLS]`/`[SEP]` for BERT.
    pub fn with_special_tokens(mut self, bos: &str, eos: &str) -> Result<Self> {
        let mut special_ids = HashMap::new();
        for token in [bos, eos] {
            let id = self
                .inner
                .token_to_id(token)
                .ok_or_else(|| EncoderError::MissingSpecialToken(token.to_string()))?;
            special_ids.insert(token.to_string(), id);
        }
        let template = build_template(bos, eos, &special_ids)?;
        self.inner.with_post_processor(Some(template));
        Ok(self)
    }

    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    pub fn inner(&self) -> &Tokenizer {
        &self.inner
    }

    /// Token ids for raw text, special tokens included.
    pub fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self.inner.encode(text, true)?;
        Ok(encoding.get_ids().to_vec())
    }

    /// Token ids plus the subword-to-word map for a pre-split sentence.
    pub fn tokenize_words<S: AsRef<str>>(&self, words: &[S]) -> Result<TokenizedSentence> {
        if words.is_empty() {
            return Err(EncoderError::InvalidInput(
                "cannot tokenize an empty word list".into(),
            ));
        }
        let words: Vec<&str> = words.iter().map(AsRef::as_ref).collect();
        let encoding = self.inner.encode(&words[..], true)?;
        let subword_map = SubwordMap::new(word_map(&encoding))?;
        Ok(TokenizedSentence {
            ids: encoding.get_ids().to_vec(),
            subword_map,
        })
    }

    /// Tokenizes and pads raw texts; no subword maps are produced.
    pub fn tokenize_batch(&self, texts: &[&str], device: &Device) -> Result<TokenizedBatch> {
        let rows = texts
            .iter()
            .map(|text| self.tokenize(text))
            .collect::<Result<Vec<_>>>()?;
        let (token_ids, lengths) = self.pad_ids(&rows, device)?;
        Ok(TokenizedBatch {
            token_ids,
            lengths,
            subword_maps: None,
        })
    }

    /// Tokenizes and pads pre-split sentences together with their subword maps.
    pub fn tokenize_word_batch<S: AsRef<str>>(
        &self,
        sentences: &[Vec<S>],
        device: &Device,
    ) -> Result<TokenizedBatch> {
        let tokenized = sentences
            .iter()
            .map(|words| self.tokenize_words(words))
            .collect::<Result<Vec<_>>>()?;
        let rows: Vec<Vec<u32>> = tokenized.iter().map(|s| s.ids.clone()).collect();
        let (token_ids, lengths) = self.pad_ids(&rows, device)?;

        let (batch, max_len) = token_ids.dims2()?;
        let mut maps = vec![SENTINEL; batch * max_len];
        for (row, sentence) in tokenized.iter().enumerate() {
            let entries = sentence.subword_map.as_slice();
            maps[row * max_len..row * max_len + entries.len()].copy_from_slice(entries);
        }
        Ok(TokenizedBatch {
            token_ids,
            lengths,
            subword_maps: Some(Tensor::from_vec(maps, (batch, max_len), device)?),
        })
    }

    fn pad_ids(&self, rows: &[Vec<u32>], device: &Device) -> Result<(Tensor, Tensor)> {
        if rows.is_empty() {
            return Err(EncoderError::InvalidInput("cannot pad an empty batch".into()));
        }
        let max_len = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut ids = Vec::with_capacity(rows.len() * max_len);
        let mut lengths = Vec::with_capacity(rows.len());
        for row in rows {
            ids.extend_from_slice(row);
            ids.extend(std::iter::repeat(self.pad_token_id).take(max_len - row.len()));
            lengths.push(row.len() as u32);
        }
        log::debug!("padded {} sequences to length {max_len}", rows.len());
        Ok((
            Tensor::from_vec(ids, (rows.len(), max_len), device)?,
            Tensor::from_vec(lengths, rows.len(), device)?,
        ))
    }
}

fn word_map(encoding: &Encoding) -> Vec<i64> {
    encoding
        .get_word_ids()
        .iter()
        .map(|word| word.map_or(SENTINEL, i64::from))
        .collect()
}

fn build_template(
    bos: &str,
    eos: &str,
    special_ids: &HashMap<String, u32>,
) -> Result<TemplateProcessing> {
    let mut builder = TemplateProcessing::builder();
    builder
        .try_single(format!("{bos}:0 $A:0 {eos}:0"))
        .map_err(EncoderError::InvalidInput)?;
    builder
        .try_pair(format!("{bos}:0 $A:0 {eos}:0 $B:1 {eos}:1"))
        .map_err(EncoderError::InvalidInput)?;
    builder.special_tokens(
        special_ids
            .iter()
            .map(|(token, id)| (token.clone(), *id))
            .collect::<Vec<_>>(),
    );
    builder
        .build()
        .map_err(|err| EncoderError::InvalidInput(err.to_string()))
}
