//! Building blocks for span pooling and probing heads.
//!
//! Every layer here keeps its learnable state in [`candle_core::Var`]s so an
//! external optimizer can update them between forward passes; layers never
//! mutate their own parameters. Inputs follow either the `(rows, hidden)` or
//! the `(batch, seq, hidden)` convention and the last axis is always the
//! feature axis.

pub mod activations;
pub mod checks;
pub mod dropout;
pub mod dtypes;
pub mod linear;
pub mod norm;

pub use activations::{builtin, Activation, ActivationKind};
pub use dropout::{Dropout, DropoutMode};
pub use dtypes::PrecisionPolicy;
pub use linear::{Linear, LinearConfig, LinearInit};
pub use norm::{LayerNorm, NormConfig};
