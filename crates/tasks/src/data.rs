//! In-memory dataset records, span examples, and batch collation.
//!
//! Records follow the edge-probing line layout: a whitespace-separated
//! `text` plus `targets`, each with a word-level `span1` (exclusive end), an
//! optional `span2`, and a `label`. Spans are aligned to subword positions
//! when examples are built, so batches only carry inclusive subword spans.

use std::collections::{BTreeMap, BTreeSet};

use candle_core::{Device, Tensor};
use encoder::SubwordTokenizer;
use serde::{Deserialize, Serialize};
use spans::{SubwordSpan, WordSpan};

use crate::{
    error::{Result, TaskError},
    vocab::LabelVocab,
};

/// Label as it appears in a record: a tag such as `"ARG0"` or a number such
/// as the `0`/`1` coreference labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    Text(String),
    Number(i64),
}

impl LabelValue {
    pub fn as_key(&self) -> String {
        match self {
            LabelValue::Text(text) => text.clone(),
            LabelValue::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRecord {
    pub span1: [usize; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span2: Option<[usize; 2]>,
    pub label: LabelValue,
}

impl TargetRecord {
    pub fn first_span(&self) -> WordSpan {
        WordSpan::new(self.span1[0], self.span1[1])
    }

    pub fn second_span(&self) -> Option<WordSpan> {
        self.span2.map(|[start, end]| WordSpan::new(start, end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceRecord {
    pub text: String,
    #[serde(default)]
    pub targets: Vec<TargetRecord>,
}

impl SentenceRecord {
    /// Parses one JSON line.
    pub fn from_json_line(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|err| TaskError::data(format!("bad record: {err}")))
    }

    pub fn words(&self) -> Vec<&str> {
        self.text.split_whitespace().collect()
    }
}

/// One sentence with its aligned span slots and label ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanExample {
    pub token_ids: Vec<u32>,
    /// Inclusive subword spans, one per span slot.
    pub spans: Vec<SubwordSpan>,
    pub labels: BTreeSet<u32>,
}

/// Builds single-span examples for constituent labeling.
///
/// Targets sharing a `span1` are merged into one example whose label set holds
/// every label of that span. Examples are emitted in sorted span order.
pub fn build_span_examples(
    records: &[SentenceRecord],
    tokenizer: &SubwordTokenizer,
    vocab: &mut LabelVocab,
) -> Result<Vec<SpanExample>> {
    let mut examples = Vec::new();
    for record in records {
        let sentence = tokenizer.tokenize_words(record.words().as_slice())?;
        let mut grouped: BTreeMap<WordSpan, BTreeSet<u32>> = BTreeMap::new();
        for target in &record.targets {
            let id = vocab.get_or_insert(target.label.as_key());
            grouped.entry(target.first_span()).or_default().insert(id);
        }
        for (span, labels) in grouped {
            examples.push(SpanExample {
                token_ids: sentence.ids.clone(),
                spans: vec![sentence.subword_map.to_subword_span(span)?],
                labels,
            });
        }
    }
    log::info!(
        "built {} span examples from {} sentences ({} labels)",
        examples.len(),
        records.len(),
        vocab.len()
    );
    Ok(examples)
}

/// Builds two-span examples for SRL and coreference, one per target.
pub fn build_span_pair_examples(
    records: &[SentenceRecord],
    tokenizer: &SubwordTokenizer,
    vocab: &mut LabelVocab,
) -> Result<Vec<SpanExample>> {
    let mut examples = Vec::new();
    for record in records {
        let sentence = tokenizer.tokenize_words(record.words().as_slice())?;
        for target in &record.targets {
            let second = target.second_span().ok_or_else(|| {
                TaskError::data(format!(
                    "target {:?} in '{}' has no span2",
                    target.span1, record.text
                ))
            })?;
            let map = &sentence.subword_map;
            let spans = vec![
                map.to_subword_span(target.first_span())?,
                map.to_subword_span(second)?,
            ];
            let label = vocab.get_or_insert(target.label.as_key());
            examples.push(SpanExample {
                token_ids: sentence.ids.clone(),
                spans,
                labels: BTreeSet::from([label]),
            });
        }
    }
    log::info!(
        "built {} span pair examples from {} sentences ({} labels)",
        examples.len(),
        records.len(),
        vocab.len()
    );
    Ok(examples)
}

/// Labels of a batch, before expansion into BCE targets.
#[derive(Debug, Clone)]
pub enum LabelTarget {
    /// `(B,)` `u32` class index per example.
    Classes(Tensor),
    /// `(B, C)` multi-hot matrix in `f32`.
    MultiHot(Tensor),
}

/// Padded batch ready for [`crate::probe::SpanProbeModel::forward`].
#[derive(Debug, Clone)]
pub struct SpanBatch {
    /// `(B, L)` `u32` token ids.
    pub token_ids: Tensor,
    /// `(B,)` `u32` unpadded lengths.
    pub lengths: Tensor,
    /// One `(B, 2)` `u32` tensor of inclusive spans per span slot.
    pub spans: Vec<Tensor>,
    pub targets: LabelTarget,
}

impl SpanBatch {
    pub fn batch_size(&self) -> Result<usize> {
        Ok(self.token_ids.dim(0)?)
    }

    pub fn num_spans(&self) -> usize {
        self.spans.len()
    }
}

/// Collates examples with label sets into a multi-hot batch.
pub fn collate_multi_label(
    examples: &[SpanExample],
    pad_token_id: u32,
    num_labels: usize,
    device: &Device,
) -> Result<SpanBatch> {
    let (token_ids, lengths, spans) = collate_inputs(examples, pad_token_id, device)?;
    let mut multi_hot = vec![0f32; examples.len() * num_labels];
    for (row, example) in examples.iter().enumerate() {
        for &label in &example.labels {
            let label = label as usize;
            if label >= num_labels {
                return Err(TaskError::data(format!(
                    "label id {label} exceeds the {num_labels} configured labels"
                )));
            }
            multi_hot[row * num_labels + label] = 1.0;
        }
    }
    Ok(SpanBatch {
        token_ids,
        lengths,
        spans,
        targets: LabelTarget::MultiHot(Tensor::from_vec(
            multi_hot,
            (examples.len(), num_labels),
            device,
        )?),
    })
}

/// Collates examples carrying exactly one label into a class-index batch.
pub fn collate_single_label(
    examples: &[SpanExample],
    pad_token_id: u32,
    num_labels: usize,
    device: &Device,
) -> Result<SpanBatch> {
    let (token_ids, lengths, spans) = collate_inputs(examples, pad_token_id, device)?;
    let mut classes = Vec::with_capacity(examples.len());
    for example in examples {
        let label = match (example.labels.len(), example.labels.first()) {
            (1, Some(&label)) => label,
            (count, _) => {
                return Err(TaskError::data(format!(
                    "single-label collation needs exactly one label, got {count}"
                )))
            }
        };
        if label as usize >= num_labels {
            return Err(TaskError::data(format!(
                "label id {label} exceeds the {num_labels} configured labels"
            )));
        }
        classes.push(label);
    }
    let batch = classes.len();
    Ok(SpanBatch {
        token_ids,
        lengths,
        spans,
        targets: LabelTarget::Classes(Tensor::from_vec(classes, batch, device)?),
    })
}

fn collate_inputs(
    examples: &[SpanExample],
    pad_token_id: u32,
    device: &Device,
) -> Result<(Tensor, Tensor, Vec<Tensor>)> {
    let first = examples
        .first()
        .ok_or_else(|| TaskError::data("cannot collate an empty batch"))?;
    let num_spans = first.spans.len();
    if examples.iter().any(|example| example.spans.len() != num_spans) {
        return Err(TaskError::data(
            "every example in a batch needs the same number of spans",
        ));
    }

    let batch = examples.len();
    let max_len = examples
        .iter()
        .map(|example| example.token_ids.len())
        .max()
        .unwrap_or(0);
    let mut ids = Vec::with_capacity(batch * max_len);
    let mut lengths = Vec::with_capacity(batch);
    for example in examples {
        ids.extend_from_slice(&example.token_ids);
        ids.extend(std::iter::repeat(pad_token_id).take(max_len - example.token_ids.len()));
        lengths.push(example.token_ids.len() as u32);
    }

    let mut spans = Vec::with_capacity(num_spans);
    for slot in 0..num_spans {
        let mut bounds = Vec::with_capacity(batch * 2);
        for example in examples {
            let span = example.spans[slot];
            bounds.push(span.start as u32);
            bounds.push(span.end as u32);
        }
        spans.push(Tensor::from_vec(bounds, (batch, 2), device)?);
    }
    log::debug!("collated {batch} examples to length {max_len} with {num_spans} span slots");

    Ok((
        Tensor::from_vec(ids, (batch, max_len), device)?,
        Tensor::from_vec(lengths, batch, device)?,
        spans,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(ids: &[u32], spans: &[(usize, usize)], labels: &[u32]) -> SpanExample {
        SpanExample {
            token_ids: ids.to_vec(),
            spans: spans.iter().map(|&(s, e)| SubwordSpan::new(s, e)).collect(),
            labels: labels.iter().copied().collect(),
        }
    }

    #[test]
    fn records_accept_text_and_numeric_labels() {
        let srl = SentenceRecord::from_json_line(
            r#"{"text": "John ate", "targets": [{"span1": [1, 2], "span2": [0, 1], "label": "ARG0"}]}"#,
        )
        .expect("srl record");
        assert_eq!(srl.words(), vec!["John", "ate"]);
        assert_eq!(srl.targets[0].label.as_key(), "ARG0");
        assert_eq!(srl.targets[0].second_span(), Some(WordSpan::new(0, 1)));

        let coref = SentenceRecord::from_json_line(
            r#"{"text": "he said", "targets": [{"span1": [0, 1], "span2": [1, 2], "label": 1}]}"#,
        )
        .expect("coref record");
        assert_eq!(coref.targets[0].label, LabelValue::Number(1));
        assert_eq!(coref.targets[0].label.as_key(), "1");

        assert!(matches!(
            SentenceRecord::from_json_line("{\"targets\": []}"),
            Err(TaskError::Data(_))
        ));
    }

    #[test]
    fn multi_label_batch_is_padded_and_multi_hot() -> Result<()> {
        let examples = vec![
            example(&[2, 4, 3], &[(1, 1)], &[0, 2]),
            example(&[2, 4, 5, 6, 3], &[(1, 3)], &[1]),
        ];
        let batch = collate_multi_label(&examples, 0, 3, &Device::Cpu)?;
        assert_eq!(batch.token_ids.to_vec2::<u32>()?[0], vec![2, 4, 3, 0, 0]);
        assert_eq!(batch.lengths.to_vec1::<u32>()?, vec![3, 5]);
        assert_eq!(batch.spans[0].to_vec2::<u32>()?, vec![vec![1, 1], vec![1, 3]]);
        match batch.targets {
            LabelTarget::MultiHot(targets) => assert_eq!(
                targets.to_vec2::<f32>()?,
                vec![vec![1.0, 0.0, 1.0], vec![0.0, 1.0, 0.0]]
            ),
            LabelTarget::Classes(_) => panic!("expected multi-hot targets"),
        }
        Ok(())
    }

    #[test]
    fn single_label_batch_keeps_both_span_slots() -> Result<()> {
        let examples = vec![
            example(&[2, 4, 5, 3], &[(1, 1), (2, 2)], &[1]),
            example(&[2, 6, 3], &[(1, 1), (1, 1)], &[0]),
        ];
        let batch = collate_single_label(&examples, 0, 2, &Device::Cpu)?;
        assert_eq!(batch.num_spans(), 2);
        assert_eq!(batch.spans[1].to_vec2::<u32>()?, vec![vec![2, 2], vec![1, 1]]);
        match batch.targets {
            LabelTarget::Classes(classes) => assert_eq!(classes.to_vec1::<u32>()?, vec![1, 0]),
            LabelTarget::MultiHot(_) => panic!("expected class targets"),
        }
        Ok(())
    }

    #[test]
    fn collation_rejects_bad_batches() {
        let device = Device::Cpu;
        assert!(collate_multi_label(&[], 0, 2, &device).is_err());

        let mixed = vec![
            example(&[2, 3], &[(0, 0)], &[0]),
            example(&[2, 3], &[(0, 0), (1, 1)], &[0]),
        ];
        assert!(collate_multi_label(&mixed, 0, 2, &device).is_err());

        let out_of_vocab = vec![example(&[2, 3], &[(0, 0)], &[5])];
        assert!(collate_single_label(&out_of_vocab, 0, 2, &device).is_err());

        let two_labels = vec![example(&[2, 3], &[(0, 0)], &[0, 1])];
        assert!(collate_single_label(&two_labels, 0, 2, &device).is_err());
    }
}
