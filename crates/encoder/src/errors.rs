use spans::SpanError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EncoderError>;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("unsupported encoder model `{0}` (expected bert, spanbert, roberta or gpt2)")]
    UnsupportedModel(String),

    #[error("unsupported size `{size}` for {model} (expected one of {allowed:?})")]
    UnsupportedSize {
        model: String,
        size: String,
        allowed: &'static [&'static str],
    },

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] tokenizers::Error),

    #[error("special token `{0}` is missing from the vocabulary")]
    MissingSpecialToken(String),

    #[error("invalid encoder input: {0}")]
    InvalidInput(String),

    #[error("alignment error: {0}")]
    Alignment(#[from] SpanError),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}
