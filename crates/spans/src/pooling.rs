//! Span pooling strategies.
//!
//! A [`SpanPooler`] reduces `encoded[b, start[b]..=end[b], :]` to one vector per
//! batch element. Every strategy accepts a different span per example. When a
//! projection dimension is configured, a learned affine map is applied to the
//! pooled vector whatever the strategy.
//!
//! | method     | raw output dim            |
//! |------------|---------------------------|
//! | `diff`     | `H`                       |
//! | `avg`      | `H`                       |
//! | `max`      | `H`                       |
//! | `attn`     | `H`                       |
//! | `endpoint` | `2H`                      |
//! | `diff_sum` | `2H`                      |
//! | `coherent` | `2 * (H / 4) + 1`         |
//!
//! Reductions over the span (mean, max, softmax) run in
//! [`PrecisionPolicy::reduction`] and are cast back to the storage dtype.

use std::{fmt, str::FromStr};

use candle_core::{DType, Device, Tensor, Var, D};
use layers::{checks, Linear, LinearConfig, LinearInit, PrecisionPolicy};

use crate::{
    error::{Result, SpanError},
    masks::SpanBounds,
};

/// Closed set of span pooling strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolingMethod {
    /// `x[end] - x[start]`.
    Diff,
    /// Mean over the inclusive range.
    Avg,
    /// Elementwise maximum over the inclusive range.
    Max,
    /// `[x[start]; x[end]]`.
    Endpoint,
    /// Softmax-weighted sum with a learned per-dimension scoring vector.
    Attn,
    /// `[x[end] - x[start]; x[end] + x[start]]`.
    DiffSum,
    /// Coherent span encoding: two quarter slices plus a dot product of the
    /// remaining quarters.
    Coherent,
}

impl PoolingMethod {
    pub const ALL: [PoolingMethod; 7] = [
        PoolingMethod::Diff,
        PoolingMethod::Avg,
        PoolingMethod::Max,
        PoolingMethod::Endpoint,
        PoolingMethod::Attn,
        PoolingMethod::DiffSum,
        PoolingMethod::Coherent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PoolingMethod::Diff => "diff",
            PoolingMethod::Avg => "avg",
            PoolingMethod::Max => "max",
            PoolingMethod::Endpoint => "endpoint",
            PoolingMethod::Attn => "attn",
            PoolingMethod::DiffSum => "diff_sum",
            PoolingMethod::Coherent => "coherent",
        }
    }

    /// Dimension of the pooled vector before any projection.
    pub fn raw_output_dim(&self, hidden_size: usize) -> usize {
        match self {
            PoolingMethod::Diff | PoolingMethod::Avg | PoolingMethod::Max | PoolingMethod::Attn => {
                hidden_size
            }
            PoolingMethod::Endpoint | PoolingMethod::DiffSum => 2 * hidden_size,
            PoolingMethod::Coherent => 2 * (hidden_size / 4) + 1,
        }
    }
}

impl fmt::Display for PoolingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolingMethod {
    type Err = SpanError;

    fn from_str(value: &str) -> Result<Self> {
        PoolingMethod::ALL
            .into_iter()
            .find(|method| method.as_str() == value)
            .ok_or_else(|| SpanError::UnsupportedPooling(value.to_string()))
    }
}

/// Static configuration of a [`SpanPooler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanPoolerConfig {
    /// Hidden size of the encoded tokens.
    pub hidden_size: usize,
    pub method: PoolingMethod,
    /// Projects pooled vectors to this dimension when set.
    pub projection_dim: Option<usize>,
}

impl SpanPoolerConfig {
    pub fn new(hidden_size: usize, method: PoolingMethod) -> Self {
        Self {
            hidden_size,
            method,
            projection_dim: None,
        }
    }

    pub fn with_projection(mut self, projection_dim: usize) -> Self {
        self.projection_dim = Some(projection_dim);
        self
    }

    /// Dimension of the pooled vectors, available without a forward pass.
    pub fn output_dim(&self) -> usize {
        self.projection_dim
            .unwrap_or_else(|| self.method.raw_output_dim(self.hidden_size))
    }

    fn validate(&self) -> Result<()> {
        if self.hidden_size == 0 {
            return Err(SpanError::InvalidConfig("hidden_size must be non-zero".into()));
        }
        if self.method == PoolingMethod::Coherent && self.hidden_size < 4 {
            return Err(SpanError::InvalidConfig(format!(
                "coherent pooling needs hidden_size >= 4, got {}",
                self.hidden_size
            )));
        }
        if self.projection_dim == Some(0) {
            return Err(SpanError::InvalidConfig(
                "projection_dim must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Capability shared by span pooling implementations.
pub trait SpanRepresentation: Send + Sync {
    fn config(&self) -> &SpanPoolerConfig;

    fn output_dim(&self) -> usize {
        self.config().output_dim()
    }

    /// Pools `encoded` `(B, L, H)` over the inclusive spans given by the
    /// `(B,)` integer tensors `start_ids` and `end_ids`, returning
    /// `(B, output_dim)`.
    fn pool(&self, encoded: &Tensor, start_ids: &Tensor, end_ids: &Tensor) -> Result<Tensor>;
}

/// Span pooler dispatching on [`PoolingMethod`].
#[derive(Debug, Clone)]
pub struct SpanPooler {
    config: SpanPoolerConfig,
    attention_weight: Option<Var>,
    projection: Option<Linear>,
    policy: PrecisionPolicy,
}

impl SpanPooler {
    /// Builds a pooler whose parameters live on `device` in `dtype`.
    ///
    /// The attention scoring vector starts at ones; projections use Xavier
    /// uniform weights with a zero bias.
    pub fn new(config: SpanPoolerConfig, device: &Device, dtype: DType) -> Result<Self> {
        config.validate()?;

        let attention_weight = if config.method == PoolingMethod::Attn {
            Some(Var::ones(config.hidden_size, dtype, device)?)
        } else {
            None
        };
        let projection = match config.projection_dim {
            Some(dim) => Some(Linear::with_init(
                LinearConfig::new(config.method.raw_output_dim(config.hidden_size), dim),
                &LinearInit::XavierUniform,
                device,
                dtype,
            )?),
            None => None,
        };

        log::info!(
            "span pooler init: method={} hidden={} projection={:?} output_dim={}",
            config.method,
            config.hidden_size,
            config.projection_dim,
            config.output_dim()
        );

        Ok(Self {
            config,
            attention_weight,
            projection,
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
        })
    }

    pub fn method(&self) -> PoolingMethod {
        self.config.method
    }

    pub fn projection(&self) -> Option<&Linear> {
        self.projection.as_ref()
    }

    pub fn attention_weight(&self) -> Option<&Tensor> {
        self.attention_weight.as_ref().map(Var::as_tensor)
    }

    /// Trainable variables under `scope`.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = Vec::new();
        if let Some(weight) = &self.attention_weight {
            params.push((format!("{scope}.attention_weight"), weight.clone()));
        }
        if let Some(projection) = &self.projection {
            params.extend(projection.named_parameters(&format!("{scope}.proj")));
        }
        params
    }

    fn pool_raw(&self, encoded: &Tensor, spans: &SpanBounds) -> Result<Tensor> {
        let device = encoded.device();
        let policy = &self.policy;
        let pooled = match self.config.method {
            PoolingMethod::Diff => {
                let (start, end) = endpoints(encoded, spans)?;
                end.sub(&start)?
            }
            PoolingMethod::Endpoint => {
                let (start, end) = endpoints(encoded, spans)?;
                Tensor::cat(&[&start, &end], 1)?
            }
            PoolingMethod::DiffSum => {
                let (start, end) = endpoints(encoded, spans)?;
                Tensor::cat(&[&end.sub(&start)?, &end.add(&start)?], 1)?
            }
            PoolingMethod::Coherent => {
                let (start, end) = endpoints(encoded, spans)?;
                let quarter = self.config.hidden_size / 4;
                let start = policy.cast_for_reduction(&start)?;
                let end = policy.cast_for_reduction(&end)?;
                let coherence = start
                    .narrow(1, 2 * quarter, quarter)?
                    .mul(&end.narrow(1, 3 * quarter, quarter)?)?
                    .sum_keepdim(1)?;
                let joined = Tensor::cat(
                    &[
                        &start.narrow(1, 0, quarter)?,
                        &end.narrow(1, quarter, quarter)?,
                        &coherence,
                    ],
                    1,
                )?;
                policy.cast_to_storage(&joined)?
            }
            PoolingMethod::Avg => {
                let reduction = policy.reduction();
                let hidden = policy.cast_for_reduction(encoded)?;
                let total = spans.select_inside(&hidden, 0.0)?.sum(1)?;
                let mean = total.broadcast_div(&spans.lengths(device, reduction)?)?;
                policy.cast_to_storage(&mean)?
            }
            PoolingMethod::Max => {
                let hidden = policy.cast_for_reduction(encoded)?;
                let max = spans.select_inside(&hidden, f32::NEG_INFINITY)?.max(1)?;
                policy.cast_to_storage(&max)?
            }
            PoolingMethod::Attn => {
                let weight = self.attention_weight.as_ref().ok_or_else(|| {
                    SpanError::InvalidConfig("attention pooling without a scoring vector".into())
                })?;
                let hidden = policy.cast_for_reduction(encoded)?;
                let hidden = spans.select_inside(&hidden, 0.0)?;
                let weight = policy.cast_for_reduction(weight.as_tensor())?;
                // (B, L, 1) scores; positions outside the span get -inf.
                let scores = hidden.broadcast_mul(&weight)?.sum_keepdim(D::Minus1)?;
                let scores = spans.select_inside(&scores, f32::NEG_INFINITY)?;
                let probs = candle_nn::ops::softmax(&scores, 1)?;
                let attended = hidden.broadcast_mul(&probs)?.sum(1)?;
                policy.cast_to_storage(&attended)?
            }
        };
        Ok(pooled)
    }
}

impl SpanRepresentation for SpanPooler {
    fn config(&self) -> &SpanPoolerConfig {
        &self.config
    }

    fn pool(&self, encoded: &Tensor, start_ids: &Tensor, end_ids: &Tensor) -> Result<Tensor> {
        checks::expect_rank("span.encoded", encoded, 3)?;
        checks::expect_last_dim("span.encoded", encoded, self.config.hidden_size)?;
        let (batch, seq_len, _) = encoded.dims3()?;
        let spans = SpanBounds::from_tensors(start_ids, end_ids, batch, seq_len)?;

        let pooled = self.pool_raw(encoded, &spans)?;
        match &self.projection {
            Some(projection) => Ok(projection.forward(&pooled, &self.policy)?),
            None => Ok(pooled),
        }
    }
}

/// Start and end token vectors, each `(B, H)`.
fn endpoints(encoded: &Tensor, spans: &SpanBounds) -> Result<(Tensor, Tensor)> {
    let (batch, seq_len, hidden) = encoded.dims3()?;
    let flat = encoded.reshape((batch * seq_len, hidden))?;
    let device = encoded.device();
    let start = flat.index_select(&spans.flat_starts(device)?, 0)?;
    let end = flat.index_select(&spans.flat_ends(device)?, 0)?;
    Ok((start, end))
}
