//! Per-example span bounds and the masks derived from them.
//!
//! Membership masks are built on the host as `(batch, seq, 1)` `u8` tensors and
//! applied with `where_cond`, never by arithmetic.

use candle_core::{DType, Device, Tensor};

use crate::error::{Result, SpanError};

/// Validated inclusive bounds for every batch element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SpanBounds {
    bounds: Vec<(usize, usize)>,
    seq_len: usize,
}

impl SpanBounds {
    /// Reads `(B,)` start and end index tensors and checks them against the
    /// encoded batch size and sequence length.
    pub(crate) fn from_tensors(
        start_ids: &Tensor,
        end_ids: &Tensor,
        batch: usize,
        seq_len: usize,
    ) -> Result<Self> {
        let starts = index_values("span.start", start_ids)?;
        let ends = index_values("span.end", end_ids)?;
        if starts.len() != batch || ends.len() != batch {
            return Err(SpanError::ShapeMismatch(format!(
                "expected {batch} span indices, got {} starts and {} ends",
                starts.len(),
                ends.len()
            )));
        }

        let mut bounds = Vec::with_capacity(batch);
        for (batch_idx, (&start, &end)) in starts.iter().zip(ends.iter()).enumerate() {
            if end < start {
                return Err(SpanError::DegenerateSpan {
                    batch: batch_idx,
                    start,
                    end,
                });
            }
            if start < 0 || end >= seq_len as i64 {
                return Err(SpanError::SpanOutOfRange {
                    batch: batch_idx,
                    start,
                    end,
                    length: seq_len,
                });
            }
            bounds.push((start as usize, end as usize));
        }
        Ok(Self { bounds, seq_len })
    }

    pub(crate) fn batch(&self) -> usize {
        self.bounds.len()
    }

    /// Span lengths as a `(B, 1)` tensor.
    pub(crate) fn lengths(&self, device: &Device, dtype: DType) -> Result<Tensor> {
        let lengths: Vec<f32> = self
            .bounds
            .iter()
            .map(|(start, end)| (end - start + 1) as f32)
            .collect();
        Ok(Tensor::from_vec(lengths, (self.batch(), 1), device)?.to_dtype(dtype)?)
    }

    /// Row offsets into a `(B * L, H)` flattening for the start tokens.
    pub(crate) fn flat_starts(&self, device: &Device) -> Result<Tensor> {
        self.flat_positions(device, |(start, _)| start)
    }

    /// Row offsets into a `(B * L, H)` flattening for the end tokens.
    pub(crate) fn flat_ends(&self, device: &Device) -> Result<Tensor> {
        self.flat_positions(device, |(_, end)| end)
    }

    fn flat_positions(
        &self,
        device: &Device,
        pick: impl Fn((usize, usize)) -> usize,
    ) -> Result<Tensor> {
        let positions: Vec<u32> = self
            .bounds
            .iter()
            .enumerate()
            .map(|(b, &span)| (b * self.seq_len + pick(span)) as u32)
            .collect();
        Ok(Tensor::from_vec(positions, self.batch(), device)?)
    }

    /// `1` inside each span and `0` elsewhere, shaped `(B, L, 1)`.
    pub(crate) fn membership(&self, device: &Device) -> Result<Tensor> {
        let mut data = vec![0u8; self.batch() * self.seq_len];
        for (b, &(start, end)) in self.bounds.iter().enumerate() {
            let row = b * self.seq_len;
            data[row + start..=row + end].fill(1);
        }
        Ok(Tensor::from_vec(data, (self.batch(), self.seq_len, 1), device)?)
    }

    /// Keeps the `(B, L, _)` rows of `values` that fall inside each span and
    /// replaces every other row with `fill`.
    ///
    /// Rows are selected rather than multiplied, so non-finite values outside
    /// the span never reach the result.
    pub(crate) fn select_inside(&self, values: &Tensor, fill: f32) -> Result<Tensor> {
        let (batch, seq_len, _) = values.dims3()?;
        if batch != self.batch() || seq_len != self.seq_len {
            return Err(SpanError::ShapeMismatch(format!(
                "cannot mask {:?} with spans over ({}, {})",
                values.dims(),
                self.batch(),
                self.seq_len
            )));
        }
        let mask = self
            .membership(values.device())?
            .broadcast_as(values.shape())?
            .contiguous()?;
        let fill = Tensor::full(fill, values.shape(), values.device())?.to_dtype(values.dtype())?;
        Ok(mask.where_cond(values, &fill)?)
    }
}

fn index_values(label: &str, indices: &Tensor) -> Result<Vec<i64>> {
    if indices.rank() != 1 {
        return Err(SpanError::ShapeMismatch(format!(
            "{label}: expected a (batch,) index vector, got {:?}",
            indices.dims()
        )));
    }
    if indices.dtype().is_float() {
        return Err(SpanError::ShapeMismatch(format!(
            "{label}: expected an integer dtype, got {:?}",
            indices.dtype()
        )));
    }
    Ok(indices.to_dtype(DType::I64)?.to_vec1::<i64>()?)
}
