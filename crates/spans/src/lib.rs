//! Span representations over encoded token sequences.
//!
//! * [`alignment`] converts word-level spans to subword token ranges.
//! * [`pooling`] reduces a `(batch, seq, hidden)` tensor to one vector per span.
//! * [`layer_weights`] mixes per-layer encoder outputs before pooling.
//!
//! Span indices handed to the pooler are inclusive and already subword aligned.

pub mod alignment;
pub mod error;
pub mod layer_weights;
mod masks;
pub mod pooling;

pub use alignment::{align_spans, SubwordMap, SubwordSpan, WordSpan, SENTINEL};
pub use error::{Result, SpanError};
pub use layer_weights::{softmax_weights, LayerSelection, LayerWeighting};
pub use pooling::{PoolingMethod, SpanPooler, SpanPoolerConfig, SpanRepresentation};
