use std::{fs, path::Path};

use candle_core::DType;
use encoder::EncoderName;
use serde::{Deserialize, Serialize};
use spans::{LayerSelection, PoolingMethod};

use crate::error::{Result, TaskError};

/// Probe hyperparameters loaded from TOML or JSON.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct ProbeConfig {
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub span: SpanConfig,
    pub head: HeadConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl ProbeConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: ProbeConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(TaskError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };
        config.validate()?;
        log::info!(
            "loaded probe config from {}: encoder={} pool={} labels={}",
            path.display(),
            config.encoder.model,
            config.span.pool_method,
            config.head.num_labels
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if let Err(err) = self.encoder.name() {
            errors.push(format!("encoder: {}", err));
        }

        if let Err(err) = self.span.pool_method.parse::<PoolingMethod>() {
            errors.push(format!("span.pool_method: {}", err));
        }

        if self.span.span_dim == 0 {
            errors.push("span.span_dim must be greater than 0".to_string());
        }

        if !(1..=2).contains(&self.span.num_spans) {
            errors.push(format!(
                "span.num_spans must be 1 or 2 (got {})",
                self.span.num_spans
            ));
        }

        if self.head.num_labels == 0 {
            errors.push("head.num_labels must be greater than 0".to_string());
        }

        if !(0.0..1.0).contains(&self.head.dropout) {
            errors.push("head.dropout must be in [0, 1)".to_string());
        }

        if !(0.0 < self.head.threshold && self.head.threshold < 1.0) {
            errors.push("head.threshold must be in (0, 1)".to_string());
        }

        if !errors.is_empty() {
            return Err(TaskError::validation(errors));
        }

        Ok(())
    }

    /// Pooling method, already checked by [`ProbeConfig::validate`].
    pub fn pooling_method(&self) -> Result<PoolingMethod> {
        Ok(self.span.pool_method.parse::<PoolingMethod>()?)
    }

    pub fn projection_dim(&self) -> Option<usize> {
        self.span.use_proj.then_some(self.span.span_dim)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_model_size")]
    pub size: String,
    #[serde(default = "default_cased")]
    pub cased: bool,
    /// Pool from the final layer instead of the learned layer mixture.
    #[serde(default)]
    pub just_last_layer: bool,
    /// Expose encoder weights as core parameters for fine-tuning.
    #[serde(default)]
    pub fine_tune: bool,
}

impl EncoderConfig {
    pub fn name(&self) -> Result<EncoderName> {
        Ok(EncoderName::parse(&self.model, &self.size, self.cased)?)
    }

    pub fn layer_selection(&self) -> LayerSelection {
        if self.just_last_layer {
            LayerSelection::LastLayer
        } else {
            LayerSelection::Weighted
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            size: default_model_size(),
            cased: default_cased(),
            just_last_layer: false,
            fine_tune: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SpanConfig {
    #[serde(default = "default_pool_method")]
    pub pool_method: String,
    /// Projection width of each pooled span and hidden width of the classifier.
    #[serde(default = "default_span_dim")]
    pub span_dim: usize,
    #[serde(default = "default_use_proj")]
    pub use_proj: bool,
    /// `1` for constituent labeling, `2` for SRL and coreference.
    #[serde(default = "default_num_spans")]
    pub num_spans: usize,
}

impl Default for SpanConfig {
    fn default() -> Self {
        Self {
            pool_method: default_pool_method(),
            span_dim: default_span_dim(),
            use_proj: default_use_proj(),
            num_spans: default_num_spans(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct HeadConfig {
    pub num_labels: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    /// Probability above which a label counts as predicted in metrics.
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

impl Default for HeadConfig {
    fn default() -> Self {
        Self {
            num_labels: 1,
            dropout: default_dropout(),
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RuntimeConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_precision")]
    pub precision: Precision,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            precision: default_precision(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Fp32,
    Fp16,
    Bf16,
}

impl Precision {
    pub fn dtype(&self) -> DType {
        match self {
            Precision::Fp32 => DType::F32,
            Precision::Fp16 => DType::F16,
            Precision::Bf16 => DType::BF16,
        }
    }
}

fn default_model() -> String {
    "bert".to_string()
}

fn default_model_size() -> String {
    "base".to_string()
}

fn default_cased() -> bool {
    true
}

fn default_pool_method() -> String {
    "avg".to_string()
}

fn default_span_dim() -> usize {
    256
}

fn default_use_proj() -> bool {
    true
}

fn default_num_spans() -> usize {
    2
}

fn default_dropout() -> f32 {
    0.2
}

fn default_threshold() -> f32 {
    0.5
}

fn default_seed() -> u64 {
    42
}

fn default_precision() -> Precision {
    Precision::Fp32
}
