//! Lightweight validation helpers shared across layer components.
//!
//! These routines provide concise shape and dtype assertions that can be wired
//! into constructors or forward paths. They return `candle_core::Result<()>`
//! so call sites can propagate errors without panicking. The `label` argument
//! names the tensor in error messages (e.g. `"linear.weight"`).

use candle_core::{DType, Error, Result, Tensor};

/// Ensures a tensor matches the expected dimensions exactly.
pub fn expect_shape(label: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    let actual = tensor.dims();
    if actual == expected {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected shape {:?}, got {:?}",
            expected, actual
        )))
    }
}

/// Ensures a tensor has exactly `rank` dimensions.
pub fn expect_rank(label: &str, tensor: &Tensor, rank: usize) -> Result<()> {
    if tensor.rank() == rank {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected rank {rank}, got shape {:?}",
            tensor.dims()
        )))
    }
}

/// Validates that the trailing (feature) axis equals `hidden`.
pub fn expect_last_dim(label: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims().last() {
        Some(actual) if *actual == hidden => Ok(()),
        _ => Err(Error::Msg(format!(
            "{label}: expected trailing dim {hidden}, got shape {:?}",
            tensor.dims()
        ))),
    }
}

/// Checks the tensor dtype is one of the allowed values.
pub fn expect_dtype_in(label: &str, tensor: &Tensor, allowed: &[DType]) -> Result<()> {
    let dtype = tensor.dtype();
    if allowed.iter().copied().any(|allowed| allowed == dtype) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: expected dtype in {:?}, got {:?}",
            allowed, dtype
        )))
    }
}

/// Parameters are expected to be contiguous so they can be updated in place.
pub fn expect_contiguous(label: &str, tensor: &Tensor) -> Result<()> {
    if tensor.is_contiguous() {
        Ok(())
    } else {
        Err(Error::Msg(format!("{label}: tensor must be contiguous")))
    }
}

/// Only floating point casts are supported by the layers in this crate.
pub fn ensure_cast_supported(label: &str, from: DType, to: DType) -> Result<()> {
    if from.is_float() && to.is_float() {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{label}: unsupported cast {:?} -> {:?}",
            from, to
        )))
    }
}
