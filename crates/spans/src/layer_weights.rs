//! Learned convex combination of per-layer encoder outputs.
//!
//! The raw weight vector is the trainable parameter; it is normalised with a
//! softmax every time it is used, so the combination stays convex whatever
//! values an optimizer writes into it.

use candle_core::{DType, Device, Tensor, Var};
use layers::{checks, PrecisionPolicy};

use crate::error::{Result, SpanError};

/// How per-layer hidden states are reduced to one tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerSelection {
    /// Softmax-weighted sum over all layers.
    #[default]
    Weighted,
    /// Use the final layer and skip weighting.
    LastLayer,
}

#[derive(Debug, Clone)]
pub struct LayerWeighting {
    selection: LayerSelection,
    num_layers: usize,
    raw: Var,
    policy: PrecisionPolicy,
}

impl LayerWeighting {
    /// Raw weights start at ones, i.e. a uniform mixture.
    pub fn new(
        num_layers: usize,
        selection: LayerSelection,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        let raw = Tensor::ones(num_layers, dtype, device)?;
        Self::from_raw(raw, selection)
    }

    /// Wraps an existing `(N,)` raw weight vector.
    pub fn from_raw(raw: Tensor, selection: LayerSelection) -> Result<Self> {
        checks::expect_rank("layer_weights.raw", &raw, 1)?;
        let num_layers = raw.dims1()?;
        if num_layers == 0 {
            return Err(SpanError::InvalidConfig(
                "layer weighting needs at least one layer".into(),
            ));
        }
        let policy = PrecisionPolicy::from_parameter_dtype(raw.dtype());
        log::info!("layer weighting init: layers={num_layers} selection={selection:?}");
        Ok(Self {
            selection,
            num_layers,
            raw: Var::from_tensor(&raw)?,
            policy,
        })
    }

    pub fn selection(&self) -> LayerSelection {
        self.selection
    }

    pub fn num_layers(&self) -> usize {
        self.num_layers
    }

    /// The unnormalised parameter updated by the optimizer.
    pub fn raw_weights(&self) -> &Tensor {
        self.raw.as_tensor()
    }

    /// Softmax of the raw weights in the reduction dtype. In last-layer mode
    /// this is the one-hot vector selecting the final layer.
    pub fn normalized_weights(&self) -> Result<Tensor> {
        match self.selection {
            LayerSelection::Weighted => softmax_weights(self.raw.as_tensor(), &self.policy),
            LayerSelection::LastLayer => {
                let mut one_hot = vec![0f32; self.num_layers];
                one_hot[self.num_layers - 1] = 1.0;
                let device = self.raw.device();
                Ok(Tensor::from_vec(one_hot, self.num_layers, device)?
                    .to_dtype(self.policy.reduction())?)
            }
        }
    }

    /// Only the weighted mode exposes a trainable parameter.
    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        match self.selection {
            LayerSelection::Weighted => vec![(format!("{scope}.raw_weights"), self.raw.clone())],
            LayerSelection::LastLayer => Vec::new(),
        }
    }

    /// Reduces `N` tensors of shape `(B, L, H)` to one `(B, L, H)` tensor.
    pub fn combine(&self, hidden_states: &[Tensor]) -> Result<Tensor> {
        if hidden_states.len() != self.num_layers {
            return Err(SpanError::ShapeMismatch(format!(
                "expected {} layer outputs, got {}",
                self.num_layers,
                hidden_states.len()
            )));
        }
        let last = &hidden_states[self.num_layers - 1];
        checks::expect_rank("layer_weights.hidden", last, 3)?;
        for (layer, hidden) in hidden_states.iter().enumerate() {
            if hidden.dims() != last.dims() {
                return Err(SpanError::ShapeMismatch(format!(
                    "layer {layer} has shape {:?}, expected {:?}",
                    hidden.dims(),
                    last.dims()
                )));
            }
        }

        match self.selection {
            LayerSelection::LastLayer => Ok(last.clone()),
            LayerSelection::Weighted => {
                let weights = self.normalized_weights()?.reshape((self.num_layers, 1, 1, 1))?;
                let stacked = Tensor::stack(hidden_states, 0)?;
                let stacked = self.policy.cast_for_reduction(&stacked)?;
                let mixed = stacked.broadcast_mul(&weights)?.sum(0)?;
                Ok(mixed.to_dtype(last.dtype())?)
            }
        }
    }
}

/// Softmax over a 1-D weight vector, computed in the reduction dtype.
pub fn softmax_weights(raw: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
    checks::expect_rank("layer_weights.raw", raw, 1)?;
    let raw = policy.cast_for_reduction(raw)?;
    Ok(candle_nn::ops::softmax(&raw, 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights_from(values: &[f32]) -> Result<LayerWeighting> {
        let raw = Tensor::from_slice(values, values.len(), &Device::Cpu)?;
        LayerWeighting::from_raw(raw, LayerSelection::Weighted)
    }

    #[test]
    fn normalized_weights_form_a_distribution() -> Result<()> {
        for raw in [
            vec![0f32, 0., 0., 0.],
            vec![50f32, -50., 0., 1.],
            vec![-3f32, -7., -1e3, -0.5],
        ] {
            let weights = weights_from(&raw)?.normalized_weights()?.to_vec1::<f32>()?;
            let total: f32 = weights.iter().sum();
            assert!((total - 1.0).abs() < 1e-5, "{raw:?} -> {weights:?}");
            assert!(weights.iter().all(|w| *w >= 0.0));
        }
        Ok(())
    }

    #[test]
    fn uniform_init_averages_layers() -> Result<()> {
        let device = Device::Cpu;
        let weighting = LayerWeighting::new(2, LayerSelection::Weighted, &device, DType::F32)?;
        let layers = [
            Tensor::full(1f32, (1, 2, 3), &device)?,
            Tensor::full(3f32, (1, 2, 3), &device)?,
        ];
        let mixed = weighting.combine(&layers)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(mixed.iter().all(|v| (v - 2.0).abs() < 1e-6));
        Ok(())
    }

    #[test]
    fn last_layer_mode_bypasses_weights() -> Result<()> {
        let device = Device::Cpu;
        let raw = Tensor::from_slice(&[10f32, -10.], 2, &device)?;
        let weighting = LayerWeighting::from_raw(raw, LayerSelection::LastLayer)?;
        let layers = [
            Tensor::zeros((1, 1, 2), DType::F32, &device)?,
            Tensor::full(4f32, (1, 1, 2), &device)?,
        ];
        let out = weighting.combine(&layers)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(out, vec![4.0, 4.0]);
        assert!(weighting.named_parameters("encoder").is_empty());
        Ok(())
    }

    #[test]
    fn layer_count_mismatch_is_an_error() -> Result<()> {
        let device = Device::Cpu;
        let weighting = LayerWeighting::new(3, LayerSelection::Weighted, &device, DType::F32)?;
        let layers = [Tensor::zeros((1, 1, 2), DType::F32, &device)?];
        assert!(matches!(
            weighting.combine(&layers),
            Err(SpanError::ShapeMismatch(_))
        ));
        Ok(())
    }
}
