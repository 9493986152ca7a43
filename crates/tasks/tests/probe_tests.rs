use std::io::Write;

use anyhow::{anyhow, bail, Result};
use candle_core::{DType, Device, Tensor, Var};
use encoder::{EncoderOutput, SubwordTokenizer, TokenEncoder};
use spans::PoolingMethod;
use tasks::{
    build_span_examples, build_span_pair_examples, collate_multi_label, collate_single_label,
    LabelVocab, ProbeConfig, ProbeOutput, SentenceRecord, SpanProbeModel, TaskError,
};
use tempfile::NamedTempFile;
use tokenizers::{models::wordpiece::WordPiece, pre_tokenizers::whitespace::WhitespaceSplit, Tokenizer};

const VOCAB: [&str; 10] = [
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "the", "cat", "sat", "un", "##believ", "##able",
];
const HIDDEN: usize = 8;
const LAYERS: usize = 3;

/// Encoder whose layer `i` is a fixed embedding lookup scaled by `i + 1`.
struct LookupEncoder {
    table: Var,
}

impl LookupEncoder {
    fn new() -> Result<Self> {
        let table = Tensor::randn(0f32, 1.0, (VOCAB.len(), HIDDEN), &Device::Cpu)?;
        Ok(Self {
            table: Var::from_tensor(&table)?,
        })
    }
}

impl TokenEncoder for LookupEncoder {
    fn hidden_size(&self) -> usize {
        HIDDEN
    }

    fn num_layers(&self) -> usize {
        LAYERS
    }

    fn pad_token_id(&self) -> u32 {
        0
    }

    fn encode(&self, token_ids: &Tensor, _attention_mask: &Tensor) -> encoder::Result<EncoderOutput> {
        let (batch, seq) = token_ids.dims2()?;
        let flat = token_ids.flatten_all()?;
        let base = self
            .table
            .as_tensor()
            .index_select(&flat, 0)?
            .reshape((batch, seq, HIDDEN))?;
        let layers = (0..LAYERS)
            .map(|layer| base.affine((layer + 1) as f64, 0.0))
            .collect::<candle_core::Result<Vec<_>>>()?;
        EncoderOutput::new(layers)
    }

    fn named_parameters(&self) -> Vec<(String, Var)> {
        vec![("embeddings.word".to_string(), self.table.clone())]
    }
}

fn tokenizer() -> Result<SubwordTokenizer> {
    let mut vocab = NamedTempFile::new()?;
    for token in VOCAB {
        writeln!(vocab, "{token}")?;
    }
    let path = vocab
        .path()
        .to_str()
        .ok_or_else(|| anyhow!("temp path is not UTF-8"))?;
    let model = WordPiece::from_file(path)
        .unk_token("[UNK]".to_string())
        .build()
        .map_err(|err| anyhow!(err))?;
    let mut inner = Tokenizer::new(model);
    inner.with_pre_tokenizer(Some(WhitespaceSplit));
    Ok(SubwordTokenizer::new(inner, "[PAD]")?.with_special_tokens("[CLS]", "[SEP]")?)
}

fn probe_config(pool_method: &str, num_spans: usize, num_labels: usize) -> ProbeConfig {
    let mut config = ProbeConfig::default();
    config.span.pool_method = pool_method.to_string();
    config.span.span_dim = 6;
    config.span.num_spans = num_spans;
    config.head.num_labels = num_labels;
    config
}

fn srl_records() -> Result<Vec<SentenceRecord>> {
    let lines = [
        r#"{"text": "the cat sat", "targets": [
            {"span1": [2, 3], "span2": [0, 2], "label": "ARG0"},
            {"span1": [2, 3], "span2": [2, 3], "label": "V"}]}"#,
        r#"{"text": "the unbelievable cat sat", "targets": [
            {"span1": [3, 4], "span2": [0, 3], "label": "ARG0"}]}"#,
    ];
    Ok(lines
        .iter()
        .map(|line| SentenceRecord::from_json_line(line))
        .collect::<tasks::Result<Vec<_>>>()?)
}

#[test]
fn constituent_examples_merge_labels_per_span() -> Result<()> {
    let tokenizer = tokenizer()?;
    let record = SentenceRecord::from_json_line(
        r#"{"text": "the unbelievable cat sat", "targets": [
            {"span1": [1, 2], "label": "NP"},
            {"span1": [0, 3], "label": "NP"},
            {"span1": [1, 2], "label": "ADJP"}]}"#,
    )?;
    let mut vocab = LabelVocab::new();
    let examples = build_span_examples(&[record], &tokenizer, &mut vocab)?;

    assert_eq!(vocab.labels(), &["NP".to_string(), "ADJP".to_string()]);
    assert_eq!(examples.len(), 2);
    assert_eq!(examples[0].token_ids, vec![2, 4, 7, 8, 9, 5, 6, 3]);
    assert_eq!((examples[0].spans[0].start, examples[0].spans[0].end), (1, 5));
    assert_eq!(examples[0].labels.iter().copied().collect::<Vec<_>>(), vec![0]);
    assert_eq!((examples[1].spans[0].start, examples[1].spans[0].end), (2, 4));
    assert_eq!(examples[1].labels.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
    Ok(())
}

#[test]
fn pair_examples_need_a_second_span() -> Result<()> {
    let tokenizer = tokenizer()?;
    let mut vocab = LabelVocab::new();
    let examples = build_span_pair_examples(&srl_records()?, &tokenizer, &mut vocab)?;
    assert_eq!(examples.len(), 3);
    assert_eq!(vocab.len(), 2);
    assert_eq!((examples[0].spans[0].start, examples[0].spans[0].end), (3, 3));
    assert_eq!((examples[0].spans[1].start, examples[0].spans[1].end), (1, 2));

    let missing = SentenceRecord::from_json_line(
        r#"{"text": "the cat", "targets": [{"span1": [0, 1], "label": "NP"}]}"#,
    )?;
    let err = build_span_pair_examples(&[missing], &tokenizer, &mut vocab).unwrap_err();
    assert!(matches!(err, TaskError::Data(_)));

    let truncated = SentenceRecord::from_json_line(
        r#"{"text": "the cat", "targets": [{"span1": [0, 1], "span2": [3, 4], "label": "NP"}]}"#,
    )?;
    let err = build_span_pair_examples(&[truncated], &tokenizer, &mut vocab).unwrap_err();
    assert!(matches!(err, TaskError::Span(_)));
    Ok(())
}

#[test]
fn training_and_evaluation_outputs() -> Result<()> {
    let tokenizer = tokenizer()?;
    let mut vocab = LabelVocab::new();
    let examples = build_span_pair_examples(&srl_records()?, &tokenizer, &mut vocab)?;
    let batch = collate_single_label(&examples, tokenizer.pad_token_id(), vocab.len(), &Device::Cpu)?;

    let probe = SpanProbeModel::new(
        LookupEncoder::new()?,
        &probe_config("avg", 2, vocab.len()),
        &Device::Cpu,
    )?;
    assert!(probe.is_training());
    match probe.forward(&batch)? {
        ProbeOutput::Training { loss } => {
            assert!(loss.metrics.average_loss().is_finite());
            assert_eq!(loss.metrics.total_labels(), 3 * vocab.len());
        }
        other => bail!("expected training output, got {other:?}"),
    }

    probe.set_training(false);
    match probe.forward(&batch)? {
        ProbeOutput::Evaluation {
            probabilities,
            labels,
            ..
        } => {
            assert_eq!(probabilities.dims(), &[3, vocab.len()]);
            for row in probabilities.to_vec2::<f32>()? {
                assert!(row.iter().all(|p| (0.0..=1.0).contains(p)));
            }
            assert_eq!(
                labels.to_vec2::<f32>()?,
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]]
            );
        }
        other => bail!("expected evaluation output, got {other:?}"),
    }
    Ok(())
}

#[test]
fn evaluation_disables_dropout() -> Result<()> {
    let tokenizer = tokenizer()?;
    let mut vocab = LabelVocab::new();
    let examples = build_span_pair_examples(&srl_records()?, &tokenizer, &mut vocab)?;
    let batch = collate_single_label(&examples, tokenizer.pad_token_id(), vocab.len(), &Device::Cpu)?;

    let mut config = probe_config("max", 2, vocab.len());
    config.head.dropout = 0.5;
    let probe = SpanProbeModel::new(LookupEncoder::new()?, &config, &Device::Cpu)?;
    probe.set_training(false);

    let first = probe.forward(&batch)?.loss().metrics.average_loss();
    let second = probe.forward(&batch)?.loss().metrics.average_loss();
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn every_pooling_method_feeds_the_head() -> Result<()> {
    let tokenizer = tokenizer()?;
    let record = SentenceRecord::from_json_line(
        r#"{"text": "the unbelievable cat sat", "targets": [
            {"span1": [1, 2], "label": "ADJP"},
            {"span1": [0, 4], "label": "S"}]}"#,
    )?;
    let mut vocab = LabelVocab::new();
    let examples = build_span_examples(&[record], &tokenizer, &mut vocab)?;
    let batch = collate_multi_label(&examples, tokenizer.pad_token_id(), vocab.len(), &Device::Cpu)?;

    for method in PoolingMethod::ALL {
        for use_proj in [true, false] {
            let mut config = probe_config(method.as_str(), 1, vocab.len());
            config.span.use_proj = use_proj;
            let probe = SpanProbeModel::new(LookupEncoder::new()?, &config, &Device::Cpu)?;
            let expected_dim = if use_proj { 6 } else { method.raw_output_dim(HIDDEN) };
            assert_eq!(probe.pooled_dim(), expected_dim, "{method}");

            probe.set_training(false);
            match probe.forward(&batch)? {
                ProbeOutput::Evaluation { probabilities, .. } => {
                    assert_eq!(probabilities.dims(), &[2, 2], "{method}");
                }
                other => bail!("expected evaluation output, got {other:?}"),
            }
        }
    }
    Ok(())
}

#[test]
fn span_slots_own_their_projections() -> Result<()> {
    let probe = SpanProbeModel::new(
        LookupEncoder::new()?,
        &probe_config("attn", 2, 4),
        &Device::Cpu,
    )?;
    let params = probe.trainable_parameters();
    let find = |name: &str| {
        params
            .iter()
            .find(|(param, _)| param == name)
            .map(|(_, var)| var.as_tensor().clone())
            .ok_or_else(|| anyhow!("missing parameter {name}"))
    };

    find("layer_weights.raw_weights")?;
    find("span_net.0.attention_weight")?;
    find("span_net.1.attention_weight")?;
    find("label_net.4.bias")?;
    let first = find("span_net.0.proj.weight")?;
    let second = find("span_net.1.proj.weight")?;
    assert_eq!(first.dims(), &[6, HIDDEN]);
    let gap = first.sub(&second)?.abs()?.max_all()?.to_vec0::<f32>()?;
    assert!(gap > 0.0);

    assert!(probe.core_parameters().is_empty());
    Ok(())
}

#[test]
fn loss_gradients_reach_every_trainable_parameter() -> Result<()> {
    let tokenizer = tokenizer()?;
    // Every span covers several subwords so the attention scores matter.
    let record = SentenceRecord::from_json_line(
        r#"{"text": "the unbelievable cat sat", "targets": [
            {"span1": [1, 2], "span2": [0, 3], "label": "ARG0"},
            {"span1": [1, 3], "span2": [0, 4], "label": "ARG1"}]}"#,
    )?;
    let mut vocab = LabelVocab::new();
    let examples = build_span_pair_examples(&[record], &tokenizer, &mut vocab)?;
    let batch = collate_single_label(&examples, tokenizer.pad_token_id(), vocab.len(), &Device::Cpu)?;

    let model = SpanProbeModel::new(
        LookupEncoder::new()?,
        &probe_config("attn", 2, vocab.len()),
        &Device::Cpu,
    )?;
    model.set_training(false);
    let output = model.forward(&batch)?;
    let grads = output.loss().loss.backward()?;

    let params = model.trainable_parameters();
    assert!(!params.is_empty());
    for (name, var) in &params {
        let grad = grads
            .get(var.as_tensor())
            .ok_or_else(|| anyhow!("no gradient for {name}"))?;
        let magnitude = grad.abs()?.sum_all()?.to_dtype(DType::F32)?.to_vec0::<f32>()?;
        assert!(magnitude.is_finite() && magnitude > 0.0, "{name}: {magnitude}");
    }
    Ok(())
}

#[test]
fn last_layer_mode_and_fine_tuning() -> Result<()> {
    let mut config = probe_config("endpoint", 1, 2);
    config.encoder.just_last_layer = true;
    config.encoder.fine_tune = true;
    let probe = SpanProbeModel::new(LookupEncoder::new()?, &config, &Device::Cpu)?;

    assert!(probe
        .trainable_parameters()
        .iter()
        .all(|(name, _)| !name.starts_with("layer_weights")));
    assert_eq!(probe.core_parameters().len(), 1);

    // The last layer is three times the lookup, so pooling it matches 3x layer one.
    let ids = Tensor::new(&[[2u32, 4, 5, 3]], &Device::Cpu)?;
    let encoded = probe.encode(&ids)?;
    let lookup = probe
        .encoder()
        .table
        .as_tensor()
        .index_select(&ids.flatten_all()?, 0)?
        .affine(3.0, 0.0)?
        .unsqueeze(0)?;
    let gap = encoded.sub(&lookup)?.abs()?.max_all()?.to_vec0::<f32>()?;
    assert!(gap < 1e-5);
    Ok(())
}

#[test]
fn mismatched_batches_are_rejected() -> Result<()> {
    let tokenizer = tokenizer()?;
    let mut vocab = LabelVocab::new();
    let examples = build_span_pair_examples(&srl_records()?, &tokenizer, &mut vocab)?;
    let batch = collate_single_label(&examples, tokenizer.pad_token_id(), vocab.len(), &Device::Cpu)?;

    let single = SpanProbeModel::new(
        LookupEncoder::new()?,
        &probe_config("diff", 1, vocab.len()),
        &Device::Cpu,
    )?;
    assert!(matches!(single.forward(&batch), Err(TaskError::Runtime(_))));

    let narrow = SpanProbeModel::new(
        LookupEncoder::new()?,
        &probe_config("diff", 2, 1),
        &Device::Cpu,
    )?;
    assert!(narrow.forward(&batch).is_err());
    Ok(())
}

#[test]
fn invalid_configs_fail_construction() -> Result<()> {
    let config = probe_config("sum", 2, 3);
    let err = SpanProbeModel::new(LookupEncoder::new()?, &config, &Device::Cpu)
        .err()
        .ok_or_else(|| anyhow!("unknown pooling method was accepted"))?;
    assert!(matches!(err, TaskError::Validation(_)));
    Ok(())
}

#[test]
fn configs_load_from_toml_and_json() -> Result<()> {
    let mut toml_file = tempfile::Builder::new().suffix(".toml").tempfile()?;
    write!(
        toml_file,
        "[encoder]\nmodel = \"spanbert\"\nsize = \"large\"\njust_last_layer = true\n\n\
         [span]\npool_method = \"coherent\"\nuse_proj = false\nnum_spans = 1\n\n\
         [head]\nnum_labels = 30\n\n[runtime]\nprecision = \"bf16\"\n"
    )?;
    let config = ProbeConfig::from_path(toml_file.path())?;
    assert_eq!(config.pooling_method()?, PoolingMethod::Coherent);
    assert_eq!(config.projection_dim(), None);
    assert_eq!(config.runtime.precision.dtype(), DType::BF16);
    assert_eq!(config.encoder.name()?.tokenizer_name(), "bert-large-cased");

    let mut json_file = tempfile::Builder::new().suffix(".json").tempfile()?;
    write!(
        json_file,
        r#"{{"span": {{"pool_method": "attn", "span_dim": 128}}, "head": {{"num_labels": 2, "dropout": 0.1}}}}"#
    )?;
    let config = ProbeConfig::from_path(json_file.path())?;
    assert_eq!(config.projection_dim(), Some(128));
    assert_eq!(config.span.num_spans, 2);

    let mut bad = tempfile::Builder::new().suffix(".toml").tempfile()?;
    write!(bad, "[span]\npool_method = \"avg\"\n")?;
    assert!(matches!(
        ProbeConfig::from_path(bad.path()),
        Err(TaskError::ConfigFormat(_))
    ));
    Ok(())
}
