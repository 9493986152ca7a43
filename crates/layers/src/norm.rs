//! Layer normalisation over the trailing feature axis.
//!
//! Inputs may have any rank; statistics are computed along the last axis in
//! [`PrecisionPolicy::reduction`] before the affine parameters are applied in
//! [`PrecisionPolicy::compute`] and the result is cast back to storage.

use candle_core::{DType, Device, Error, Result, Tensor, Var, D};

use crate::{checks, dtypes::PrecisionPolicy};

/// Configuration for [`LayerNorm`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the feature dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser added to the variance.
    pub epsilon: f64,
    /// Whether post-normalisation affine parameters should be trained.
    pub elementwise_affine: bool,
}

impl NormConfig {
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-5,
            elementwise_affine: true,
        }
    }
}

/// Standard LayerNorm with optional learnable scale and shift.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Option<Var>,
    bias: Option<Var>,
}

impl LayerNorm {
    /// Builds a LayerNorm from explicit parameters.
    pub fn new(config: NormConfig, weight: Option<Tensor>, bias: Option<Tensor>) -> Result<Self> {
        if config.elementwise_affine {
            if weight.is_none() || bias.is_none() {
                return Err(Error::Msg(
                    "elementwise affine norms must supply scale and bias parameters".into(),
                ));
            }
        } else if weight.is_some() || bias.is_some() {
            return Err(Error::Msg(
                "non-affine norms must not include scale or bias parameters".into(),
            ));
        }

        let allowed = [DType::F16, DType::BF16, DType::F32, DType::F64];
        for (label, param) in [("norm.weight", &weight), ("norm.bias", &bias)] {
            if let Some(param) = param {
                checks::expect_shape(label, param, &[config.hidden_size])?;
                checks::expect_dtype_in(label, param, &allowed)?;
                checks::expect_contiguous(label, param)?;
            }
        }

        Ok(Self {
            config,
            weight: weight.map(|w| Var::from_tensor(&w)).transpose()?,
            bias: bias.map(|b| Var::from_tensor(&b)).transpose()?,
        })
    }

    /// Unit scale and zero shift, matching the usual LayerNorm initialisation.
    pub fn initialized(config: NormConfig, device: &Device, dtype: DType) -> Result<Self> {
        let (weight, bias) = if config.elementwise_affine {
            (
                Some(Tensor::ones(config.hidden_size, dtype, device)?),
                Some(Tensor::zeros(config.hidden_size, dtype, device)?),
            )
        } else {
            (None, None)
        };
        Self::new(config, weight, bias)
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = Vec::new();
        if let Some(weight) = &self.weight {
            params.push((format!("{scope}.weight"), weight.clone()));
        }
        if let Some(bias) = &self.bias {
            params.push((format!("{scope}.bias"), bias.clone()));
        }
        params
    }

    pub fn forward(&self, hidden: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        checks::expect_last_dim("norm.input", hidden, self.config.hidden_size)?;

        let hidden_size = self.config.hidden_size as f64;
        let compute = policy.cast_for_reduction(hidden)?;
        let mean = (compute.sum_keepdim(D::Minus1)? / hidden_size)?;
        let centered = compute.broadcast_sub(&mean)?;
        let variance = (centered.sqr()?.sum_keepdim(D::Minus1)? / hidden_size)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        let mut normalized = centered.broadcast_div(&denom)?;

        if normalized.dtype() != policy.compute() {
            normalized = normalized.to_dtype(policy.compute())?;
        }
        if let Some(weight) = &self.weight {
            let weight = weight.as_tensor().to_dtype(normalized.dtype())?;
            normalized = normalized.broadcast_mul(&weight)?;
        }
        if let Some(bias) = &self.bias {
            let bias = bias.as_tensor().to_dtype(normalized.dtype())?;
            normalized = normalized.broadcast_add(&bias)?;
        }

        policy.cast_to_storage(&normalized)
    }
}
