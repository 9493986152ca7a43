//! Span probing model: encoder, layer mixture, span poolers, label head.

use std::sync::atomic::{AtomicBool, Ordering};

use candle_core::{Device, Tensor, Var};
use encoder::{attention_mask, TokenEncoder};
use spans::{LayerWeighting, SpanPooler, SpanPoolerConfig, SpanRepresentation};

use crate::{
    classifier::{LabelClassifier, LabelClassifierConfig},
    config::ProbeConfig,
    data::{LabelTarget, SpanBatch},
    error::{Result, TaskError},
    loss::{one_hot, BinaryCrossEntropyLoss, LossOutput},
};

/// Result of [`SpanProbeModel::forward`].
#[derive(Debug, Clone)]
pub enum ProbeOutput {
    Training {
        loss: LossOutput,
    },
    Evaluation {
        loss: LossOutput,
        /// `(batch, num_labels)` sigmoid outputs.
        probabilities: Tensor,
        /// `(batch, num_labels)` 0/1 targets the loss was computed against.
        labels: Tensor,
    },
}

impl ProbeOutput {
    pub fn loss(&self) -> &LossOutput {
        match self {
            ProbeOutput::Training { loss } | ProbeOutput::Evaluation { loss, .. } => loss,
        }
    }
}

/// Classifies one or two spans of each sentence from pooled encoder states.
pub struct SpanProbeModel<E: TokenEncoder> {
    encoder: E,
    fine_tune: bool,
    layer_weights: LayerWeighting,
    span_net: Vec<SpanPooler>,
    label_net: LabelClassifier,
    criterion: BinaryCrossEntropyLoss,
    num_labels: usize,
    training: AtomicBool,
}

impl<E: TokenEncoder> SpanProbeModel<E> {
    pub fn new(encoder: E, config: &ProbeConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let hidden_size = encoder.hidden_size();
        let num_layers = encoder.num_layers();
        if hidden_size == 0 || num_layers == 0 {
            return Err(TaskError::initialization(format!(
                "encoder reports hidden_size={hidden_size} and num_layers={num_layers}"
            )));
        }

        let dtype = config.runtime.precision.dtype();
        let method = config.pooling_method()?;
        let layer_weights = LayerWeighting::new(
            num_layers,
            config.encoder.layer_selection(),
            device,
            dtype,
        )?;

        let mut pooler_config = SpanPoolerConfig::new(hidden_size, method);
        if let Some(dim) = config.projection_dim() {
            pooler_config = pooler_config.with_projection(dim);
        }
        let span_net = (0..config.span.num_spans)
            .map(|_| SpanPooler::new(pooler_config.clone(), device, dtype))
            .collect::<spans::Result<Vec<_>>>()?;
        let pooled_dim = pooler_config.output_dim();

        let label_net = LabelClassifier::new(
            LabelClassifierConfig {
                input_dim: pooled_dim * config.span.num_spans,
                hidden_dim: config.span.span_dim,
                num_labels: config.head.num_labels,
                dropout: config.head.dropout,
                seed: config.runtime.seed,
            },
            device,
            dtype,
        )?;
        let criterion = BinaryCrossEntropyLoss::new().with_threshold(config.head.threshold)?;

        log::info!(
            "span probe init: layers={} hidden={} pool={} spans={} pooled_dim={} labels={}",
            num_layers,
            hidden_size,
            method,
            config.span.num_spans,
            pooled_dim,
            config.head.num_labels
        );

        Ok(Self {
            encoder,
            fine_tune: config.encoder.fine_tune,
            layer_weights,
            span_net,
            label_net,
            criterion,
            num_labels: config.head.num_labels,
            training: AtomicBool::new(true),
        })
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    pub fn layer_weights(&self) -> &LayerWeighting {
        &self.layer_weights
    }

    pub fn span_poolers(&self) -> &[SpanPooler] {
        &self.span_net
    }

    pub fn num_spans(&self) -> usize {
        self.span_net.len()
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    /// Width of one pooled span vector.
    pub fn pooled_dim(&self) -> usize {
        self.span_net.first().map_or(0, |pooler| pooler.output_dim())
    }

    /// Switches dropout and the returned [`ProbeOutput`] variant.
    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
        self.label_net.set_training(training);
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    /// Named parameters outside the encoder.
    pub fn trainable_parameters(&self) -> Vec<(String, Var)> {
        let mut params = self.layer_weights.named_parameters("layer_weights");
        for (index, pooler) in self.span_net.iter().enumerate() {
            params.extend(pooler.named_parameters(&format!("span_net.{index}")));
        }
        params.extend(self.label_net.named_parameters("label_net"));
        for (name, var) in &params {
            log::debug!("probe parameter {name}: {:?}", var.as_tensor().dims());
        }
        params
    }

    /// Encoder parameters, empty unless fine-tuning is enabled.
    pub fn core_parameters(&self) -> Vec<(String, Var)> {
        if self.fine_tune {
            self.encoder.named_parameters()
        } else {
            Vec::new()
        }
    }

    /// Per-token embeddings `(B, L, H)` after layer selection or mixing.
    pub fn encode(&self, token_ids: &Tensor) -> Result<Tensor> {
        let mask = attention_mask(token_ids, self.encoder.pad_token_id())?;
        let output = self.encoder.encode(token_ids, &mask)?;
        Ok(self.layer_weights.combine(output.hidden_states())?)
    }

    /// Pools span slot `index` from `encoded`; `spans` is `(B, 2)` inclusive.
    pub fn span_repr(&self, encoded: &Tensor, spans: &Tensor, index: usize) -> Result<Tensor> {
        let pooler = self.span_net.get(index).ok_or_else(|| {
            TaskError::runtime(format!(
                "span slot {index} out of range for {} poolers",
                self.span_net.len()
            ))
        })?;
        if spans.rank() != 2 || spans.dim(1)? != 2 {
            return Err(TaskError::runtime(format!(
                "span slot {index} must be shaped (batch, 2), got {:?}",
                spans.dims()
            )));
        }
        let starts = spans.narrow(1, 0, 1)?.squeeze(1)?;
        let ends = spans.narrow(1, 1, 1)?.squeeze(1)?;
        Ok(pooler.pool(encoded, &starts, &ends)?)
    }

    pub fn forward(&self, batch: &SpanBatch) -> Result<ProbeOutput> {
        if batch.num_spans() != self.span_net.len() {
            return Err(TaskError::runtime(format!(
                "batch carries {} span slots but the probe pools {}",
                batch.num_spans(),
                self.span_net.len()
            )));
        }

        let encoded = self.encode(&batch.token_ids)?;
        let reprs = batch
            .spans
            .iter()
            .enumerate()
            .map(|(index, spans)| self.span_repr(&encoded, spans, index))
            .collect::<Result<Vec<_>>>()?;
        let features = Tensor::cat(&reprs, 1)?;
        let probabilities = self.label_net.forward(&features)?;

        let labels = match &batch.targets {
            LabelTarget::Classes(classes) => one_hot(classes, self.num_labels)?,
            LabelTarget::MultiHot(targets) => targets.clone(),
        };
        let loss = self.criterion.compute(&probabilities, &labels)?;

        if self.is_training() {
            Ok(ProbeOutput::Training { loss })
        } else {
            Ok(ProbeOutput::Evaluation {
                loss,
                probabilities,
                labels,
            })
        }
    }
}
