//! Span probing heads for structured prediction.
//!
//! A [`SpanProbeModel`] runs any [`encoder::TokenEncoder`], mixes its layers,
//! pools one or two spans per sentence with independent poolers, and scores
//! every label with a sigmoid head trained by binary cross entropy. Dataset
//! records are aligned to subword spans up front and collated into
//! [`SpanBatch`]es.

pub mod classifier;
pub mod config;
pub mod data;
pub mod error;
pub mod loss;
pub mod probe;
pub mod vocab;

pub use classifier::{LabelClassifier, LabelClassifierConfig};
pub use config::{EncoderConfig, HeadConfig, Precision, ProbeConfig, RuntimeConfig, SpanConfig};
pub use data::{
    build_span_examples, build_span_pair_examples, collate_multi_label, collate_single_label,
    LabelTarget, LabelValue, SentenceRecord, SpanBatch, SpanExample, TargetRecord,
};
pub use error::{Result, TaskError};
pub use loss::{one_hot, BinaryCrossEntropyLoss, LossMetrics, LossOutput};
pub use probe::{ProbeOutput, SpanProbeModel};
pub use vocab::LabelVocab;
