//! Label head applied to concatenated span vectors.
//!
//! `linear -> tanh -> layer norm -> dropout -> linear -> sigmoid`, producing
//! one independent probability per label.

use std::sync::Arc;

use candle_core::{DType, Device, Tensor, Var};
use layers::{
    builtin, checks, Activation, ActivationKind, Dropout, LayerNorm, Linear, LinearConfig,
    LinearInit, NormConfig, PrecisionPolicy,
};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct LabelClassifierConfig {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub num_labels: usize,
    pub dropout: f32,
    pub seed: u64,
}

pub struct LabelClassifier {
    config: LabelClassifierConfig,
    hidden: Linear,
    hidden_activation: Arc<dyn Activation>,
    norm: LayerNorm,
    dropout: Dropout,
    output: Linear,
    output_activation: Arc<dyn Activation>,
    policy: PrecisionPolicy,
}

impl std::fmt::Debug for LabelClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabelClassifier")
            .field("config", &self.config)
            .field("training", &self.dropout.is_training())
            .finish()
    }
}

impl LabelClassifier {
    pub fn new(config: LabelClassifierConfig, device: &Device, dtype: DType) -> Result<Self> {
        let hidden = Linear::with_init(
            LinearConfig::new(config.input_dim, config.hidden_dim),
            &LinearInit::XavierUniform,
            device,
            dtype,
        )?;
        let norm = LayerNorm::initialized(NormConfig::new(config.hidden_dim), device, dtype)?;
        let output = Linear::with_init(
            LinearConfig::new(config.hidden_dim, config.num_labels),
            &LinearInit::XavierUniform,
            device,
            dtype,
        )?;
        log::info!(
            "label classifier init: {} -> {} -> {} labels (dropout={})",
            config.input_dim,
            config.hidden_dim,
            config.num_labels,
            config.dropout
        );
        Ok(Self {
            dropout: Dropout::new(config.dropout, config.seed),
            config,
            hidden,
            hidden_activation: builtin(ActivationKind::Tanh),
            norm,
            output,
            output_activation: builtin(ActivationKind::Sigmoid),
            policy: PrecisionPolicy::from_parameter_dtype(dtype),
        })
    }

    pub fn config(&self) -> &LabelClassifierConfig {
        &self.config
    }

    pub fn set_training(&self, training: bool) {
        self.dropout.set_training(training);
    }

    pub fn is_training(&self) -> bool {
        self.dropout.is_training()
    }

    pub fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.hidden.named_parameters(&format!("{scope}.0"));
        params.extend(self.norm.named_parameters(&format!("{scope}.2")));
        params.extend(self.output.named_parameters(&format!("{scope}.4")));
        params
    }

    /// Maps `(batch, input_dim)` span features to `(batch, num_labels)`
    /// probabilities.
    pub fn forward(&self, features: &Tensor) -> Result<Tensor> {
        checks::expect_rank("label_net.input", features, 2)?;
        checks::expect_last_dim("label_net.input", features, self.config.input_dim)?;
        let hidden = self.hidden.forward(features, &self.policy)?;
        let hidden = self.hidden_activation.forward(&hidden, &self.policy)?;
        let hidden = self.norm.forward(&hidden, &self.policy)?;
        let hidden = self.dropout.forward(&hidden, &self.policy)?;
        let logits = self.output.forward(&hidden, &self.policy)?;
        Ok(self.output_activation.forward(&logits, &self.policy)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Result<LabelClassifier> {
        LabelClassifier::new(
            LabelClassifierConfig {
                input_dim: 6,
                hidden_dim: 4,
                num_labels: 3,
                dropout: 0.5,
                seed: 7,
            },
            &Device::Cpu,
            DType::F32,
        )
    }

    #[test]
    fn outputs_are_probabilities() -> Result<()> {
        let head = classifier()?;
        let features = Tensor::randn(0f32, 3.0, (5, 6), &Device::Cpu)?;
        let probs = head.forward(&features)?;
        assert_eq!(probs.dims(), &[5, 3]);
        for row in probs.to_vec2::<f32>()? {
            assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
        }
        Ok(())
    }

    #[test]
    fn evaluation_mode_is_deterministic() -> Result<()> {
        let head = classifier()?;
        head.set_training(false);
        let features = Tensor::randn(0f32, 1.0, (2, 6), &Device::Cpu)?;
        let first = head.forward(&features)?.to_vec2::<f32>()?;
        let second = head.forward(&features)?.to_vec2::<f32>()?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn parameters_follow_sequential_layout() -> Result<()> {
        let names: Vec<String> = classifier()?
            .named_parameters("label_net")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(
            names,
            vec![
                "label_net.0.weight",
                "label_net.0.bias",
                "label_net.2.weight",
                "label_net.2.bias",
                "label_net.4.weight",
                "label_net.4.bias",
            ]
        );
        Ok(())
    }

    #[test]
    fn rejects_wrong_feature_width() -> Result<()> {
        let features = Tensor::zeros((2, 5), DType::F32, &Device::Cpu)?;
        assert!(classifier()?.forward(&features).is_err());
        Ok(())
    }
}
