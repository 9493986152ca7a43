//! Word-level to subword-level span conversion.
//!
//! A [`SubwordMap`] holds one entry per subword token naming the word that owns
//! it, with [`SENTINEL`] (`-1`) for special symbols and padding. Word spans use
//! an exclusive end; the subword spans they convert to use an inclusive end and
//! always cover the first subword of the first word through the last subword of
//! the last word.

use candle_core::{DType, Device, Tensor};

use crate::error::{Result, SpanError};

/// Map entry used for special tokens and padding.
pub const SENTINEL: i64 = -1;

/// Word-level span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WordSpan {
    pub start: usize,
    pub end: usize,
}

impl WordSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Subword-level span `[start, end]` (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubwordSpan {
    pub start: usize,
    pub end: usize,
}

impl SubwordSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of subword tokens covered; zero for an inverted span.
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shifts both endpoints, e.g. past leading special tokens.
    pub fn shifted(self, offset: usize) -> Self {
        Self::new(self.start + offset, self.end + offset)
    }
}

/// Validated subword-to-word index table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubwordMap {
    entries: Vec<i64>,
}

impl SubwordMap {
    /// Checks that every entry is a word index or the sentinel and that word
    /// indices never decrease once sentinels are skipped.
    pub fn new(entries: Vec<i64>) -> Result<Self> {
        let mut previous: Option<i64> = None;
        for (position, &entry) in entries.iter().enumerate() {
            if entry < SENTINEL {
                return Err(SpanError::InvalidSubwordMap(format!(
                    "entry {entry} at position {position} is below the {SENTINEL} sentinel"
                )));
            }
            if entry == SENTINEL {
                continue;
            }
            if let Some(prev) = previous {
                if entry < prev {
                    return Err(SpanError::InvalidSubwordMap(format!(
                        "word index decreases from {prev} to {entry} at position {position}"
                    )));
                }
            }
            previous = Some(entry);
        }
        Ok(Self { entries })
    }

    /// Reads a `(L,)` or `(1, L)` integer tensor.
    pub fn from_tensor(map: &Tensor) -> Result<Self> {
        let entries = match map.dims() {
            [_] => map.to_dtype(DType::I64)?.to_vec1::<i64>()?,
            [1, _] => map.flatten_all()?.to_dtype(DType::I64)?.to_vec1::<i64>()?,
            dims => {
                return Err(SpanError::ShapeMismatch(format!(
                    "subword map must be shaped (L,) or (1, L), got {dims:?}"
                )))
            }
        };
        Self::new(entries)
    }

    pub fn as_slice(&self) -> &[i64] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Owning word of the subword at `index`; `None` for sentinels or out of range.
    pub fn word_of(&self, index: usize) -> Option<usize> {
        match self.entries.get(index) {
            Some(&entry) if entry >= 0 => Some(entry as usize),
            _ => None,
        }
    }

    /// Number of distinct words referenced by the map.
    pub fn num_words(&self) -> usize {
        self.entries
            .iter()
            .copied()
            .filter(|&entry| entry >= 0)
            .max()
            .map_or(0, |max| max as usize + 1)
    }

    /// Converts a word span into the inclusive subword span covering it.
    pub fn to_subword_span(&self, span: WordSpan) -> Result<SubwordSpan> {
        if span.is_empty() {
            return Err(SpanError::EmptyWordSpan {
                start: span.start,
                end: span.end,
            });
        }
        let first_word = span.start as i64;
        let last_word = (span.end - 1) as i64;

        let start = self
            .entries
            .iter()
            .position(|&entry| entry == first_word)
            .ok_or(SpanError::WordNotInMap { word: span.start })?;
        let end = self
            .entries
            .iter()
            .rposition(|&entry| entry == last_word)
            .ok_or(SpanError::WordNotInMap { word: span.end - 1 })?;
        Ok(SubwordSpan::new(start, end))
    }

    /// Row tensor `(1, L)` of `i64` entries.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_slice(&self.entries, (1, self.entries.len()), device)?)
    }
}

/// Converts `K` word spans, given as a `(K, 2)` integer tensor with exclusive
/// ends, into start and end subword index vectors of length `K` (`u32`).
///
/// `start_shift` is added to every returned index so a map that omits leading
/// special tokens still yields positions into the full token sequence.
pub fn align_spans(
    word_spans: &Tensor,
    subword_map: &Tensor,
    start_shift: usize,
) -> Result<(Tensor, Tensor)> {
    let rows = match word_spans.dims() {
        [_, 2] => word_spans.to_dtype(DType::I64)?.to_vec2::<i64>()?,
        dims => {
            return Err(SpanError::ShapeMismatch(format!(
                "word spans must be shaped (K, 2), got {dims:?}"
            )))
        }
    };
    let map = SubwordMap::from_tensor(subword_map)?;

    let mut starts = Vec::with_capacity(rows.len());
    let mut ends = Vec::with_capacity(rows.len());
    for row in rows {
        let (word_start, word_end) = (row[0], row[1]);
        if word_start < 0 || word_end < 0 {
            return Err(SpanError::NegativeWordIndex {
                start: word_start,
                end: word_end,
            });
        }
        if word_end <= word_start {
            return Err(SpanError::EmptyWordSpan {
                start: word_start as usize,
                end: word_end as usize,
            });
        }
        let span = map
            .to_subword_span(WordSpan::new(word_start as usize, word_end as usize))?
            .shifted(start_shift);
        starts.push(span.start as u32);
        ends.push(span.end as u32);
    }
    log::debug!("aligned {} word spans (start_shift={start_shift})", starts.len());

    let device = word_spans.device();
    let len = starts.len();
    Ok((
        Tensor::from_vec(starts, len, device)?,
        Tensor::from_vec(ends, len, device)?,
    ))
}
