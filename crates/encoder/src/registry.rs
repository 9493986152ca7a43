//! Pretrained encoder names.
//!
//! Resolves a model family, size and casing into the checkpoint and tokenizer
//! identifiers used by the pretrained weight hubs. Weight loading itself is
//! left to the [`crate::TokenEncoder`] implementation.

use std::{fmt, str::FromStr};

use crate::errors::{EncoderError, Result};

const BERT_SIZES: &[&str] = &["base", "large"];
const GPT2_SIZES: &[&str] = &["", "medium", "large"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderFamily {
    Bert,
    SpanBert,
    Roberta,
    Gpt2,
}

impl EncoderFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderFamily::Bert => "bert",
            EncoderFamily::SpanBert => "spanbert",
            EncoderFamily::Roberta => "roberta",
            EncoderFamily::Gpt2 => "gpt2",
        }
    }

    pub fn allowed_sizes(&self) -> &'static [&'static str] {
        match self {
            EncoderFamily::Gpt2 => GPT2_SIZES,
            _ => BERT_SIZES,
        }
    }
}

impl fmt::Display for EncoderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncoderFamily {
    type Err = EncoderError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "bert" => Ok(EncoderFamily::Bert),
            "spanbert" => Ok(EncoderFamily::SpanBert),
            "roberta" => Ok(EncoderFamily::Roberta),
            "gpt2" => Ok(EncoderFamily::Gpt2),
            other => Err(EncoderError::UnsupportedModel(other.to_string())),
        }
    }
}

/// Validated family, size and casing of a pretrained encoder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EncoderName {
    family: EncoderFamily,
    size: String,
    cased: bool,
}

impl EncoderName {
    pub fn new(family: EncoderFamily, size: &str, cased: bool) -> Result<Self> {
        let allowed = family.allowed_sizes();
        if !allowed.contains(&size) {
            return Err(EncoderError::UnsupportedSize {
                model: family.to_string(),
                size: size.to_string(),
                allowed,
            });
        }
        Ok(Self {
            family,
            size: size.to_string(),
            cased,
        })
    }

    /// Parses the family name and validates the size.
    pub fn parse(model: &str, size: &str, cased: bool) -> Result<Self> {
        Self::new(model.parse()?, size, cased)
    }

    pub fn family(&self) -> EncoderFamily {
        self.family
    }

    pub fn size(&self) -> &str {
        &self.size
    }

    pub fn cased(&self) -> bool {
        self.cased
    }

    pub fn lowercase_input(&self) -> bool {
        !self.cased
    }

    /// Checkpoint identifier, e.g. `bert-base-uncased`, `roberta-large`, `gpt2-medium`.
    pub fn model_name(&self) -> String {
        match self.family {
            EncoderFamily::Gpt2 if self.size.is_empty() => "gpt2".to_string(),
            EncoderFamily::Gpt2 => format!("gpt2-{}", self.size),
            EncoderFamily::Roberta => format!("roberta-{}", self.size),
            EncoderFamily::Bert if !self.cased => format!("bert-{}-uncased", self.size),
            family => format!("{family}-{}-cased", self.size),
        }
    }

    /// SpanBERT ships without its own vocabulary and reuses BERT's.
    pub fn tokenizer_name(&self) -> String {
        match self.family {
            EncoderFamily::SpanBert => format!("bert-{}-cased", self.size),
            _ => self.model_name(),
        }
    }
}

impl fmt::Display for EncoderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.model_name())
    }
}
