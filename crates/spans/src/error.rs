use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpanError>;

#[derive(Error, Debug)]
pub enum SpanError {
    #[error(
        "unsupported pooling method `{0}` (expected diff, avg, max, endpoint, attn, diff_sum or coherent)"
    )]
    UnsupportedPooling(String),

    #[error("word index {word} does not appear in the subword map")]
    WordNotInMap { word: usize },

    #[error("word span [{start}, {end}) is empty")]
    EmptyWordSpan { start: usize, end: usize },

    #[error("word span [{start}, {end}) has a negative index")]
    NegativeWordIndex { start: i64, end: i64 },

    #[error("invalid subword map: {0}")]
    InvalidSubwordMap(String),

    #[error("degenerate span ({start}, {end}) at batch index {batch}: end precedes start")]
    DegenerateSpan { batch: usize, start: i64, end: i64 },

    #[error("span ({start}, {end}) at batch index {batch} is outside a sequence of length {length}")]
    SpanOutOfRange {
        batch: usize,
        start: i64,
        end: i64,
        length: usize,
    },

    #[error("invalid pooling configuration: {0}")]
    InvalidConfig(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}
