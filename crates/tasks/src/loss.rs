use candle_core::{DType, Tensor};

use crate::error::{Result, TaskError};

/// Lower bound applied to `log(p)` and `log(1 - p)` so saturated
/// probabilities give a finite loss.
const LOG_CLAMP: f64 = -100.0;

/// Mean binary cross entropy over every (example, label) cell.
#[derive(Debug, Clone)]
pub struct BinaryCrossEntropyLoss {
    threshold: f32,
}

impl BinaryCrossEntropyLoss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_threshold(mut self, threshold: f32) -> Result<Self> {
        if !(0.0 < threshold && threshold < 1.0) {
            return Err(TaskError::initialization(
                "prediction threshold must be in (0, 1) for binary cross entropy",
            ));
        }
        self.threshold = threshold;
        Ok(self)
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// `probabilities` and `targets` are `(batch, labels)`; targets hold 0/1.
    pub fn compute(&self, probabilities: &Tensor, targets: &Tensor) -> Result<LossOutput> {
        if probabilities.rank() != 2 {
            return Err(TaskError::runtime(format!(
                "binary cross entropy expects (batch, labels) probabilities, got {:?}",
                probabilities.dims()
            )));
        }
        if probabilities.dims() != targets.dims() {
            return Err(TaskError::runtime(format!(
                "targets {:?} must match probabilities {:?}",
                targets.dims(),
                probabilities.dims()
            )));
        }
        let total_labels = probabilities.elem_count();
        if total_labels == 0 {
            return Err(TaskError::runtime("no labels available for loss computation"));
        }

        let probs = probabilities.to_dtype(DType::F32)?;
        let targets = targets.to_device(probs.device())?.to_dtype(DType::F32)?;

        let log_p = probs.log()?.maximum(LOG_CLAMP)?;
        let log_not_p = probs.affine(-1.0, 1.0)?.log()?.maximum(LOG_CLAMP)?;
        let not_targets = targets.affine(-1.0, 1.0)?;
        let per_label = ((&targets * &log_p)? + (&not_targets * &log_not_p)?)?.neg()?;
        let loss = per_label.mean_all()?;
        let average_loss = loss.to_vec0::<f32>()?;

        let predicted = probs.flatten_all()?.to_vec1::<f32>()?;
        let expected = targets.flatten_all()?.to_vec1::<f32>()?;
        let correct_labels = predicted
            .iter()
            .zip(&expected)
            .filter(|(p, t)| (**p >= self.threshold) == (**t > 0.5))
            .count();
        log::debug!(
            "bce over {total_labels} labels: loss={average_loss:.4} correct={correct_labels}"
        );

        Ok(LossOutput {
            loss,
            metrics: LossMetrics {
                average_loss,
                total_labels,
                correct_labels,
            },
        })
    }
}

impl Default for BinaryCrossEntropyLoss {
    fn default() -> Self {
        Self { threshold: 0.5 }
    }
}

#[derive(Debug, Clone)]
pub struct LossOutput {
    pub loss: Tensor,
    pub metrics: LossMetrics,
}

#[derive(Debug, Clone)]
pub struct LossMetrics {
    average_loss: f32,
    total_labels: usize,
    correct_labels: usize,
}

impl LossMetrics {
    pub fn average_loss(&self) -> f32 {
        self.average_loss
    }

    pub fn total_labels(&self) -> usize {
        self.total_labels
    }

    pub fn correct_labels(&self) -> usize {
        self.correct_labels
    }

    pub fn accuracy(&self) -> f32 {
        if self.total_labels == 0 {
            0.0
        } else {
            self.correct_labels as f32 / self.total_labels as f32
        }
    }
}

/// Expands `(batch,)` class ids into a `(batch, num_labels)` `f32` one-hot matrix.
pub fn one_hot(class_ids: &Tensor, num_labels: usize) -> Result<Tensor> {
    let ids = class_ids.to_dtype(DType::U32)?.to_vec1::<u32>()?;
    let mut dense = vec![0f32; ids.len() * num_labels];
    for (row, &id) in ids.iter().enumerate() {
        let id = id as usize;
        if id >= num_labels {
            return Err(TaskError::data(format!(
                "class id {id} exceeds the {num_labels} configured labels"
            )));
        }
        dense[row * num_labels + id] = 1.0;
    }
    Ok(Tensor::from_vec(
        dense,
        (ids.len(), num_labels),
        class_ids.device(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn matches_closed_form() -> Result<()> {
        let device = Device::Cpu;
        let probs = Tensor::new(&[[0.9f32, 0.2], [0.4, 0.7]], &device)?;
        let targets = Tensor::new(&[[1f32, 0.0], [1.0, 0.0]], &device)?;
        let output = BinaryCrossEntropyLoss::new().compute(&probs, &targets)?;

        let expected =
            -((0.9f32).ln() + (0.8f32).ln() + (0.4f32).ln() + (0.3f32).ln()) / 4.0;
        assert!((output.metrics.average_loss() - expected).abs() < 1e-5);
        assert_eq!(output.metrics.total_labels(), 4);
        assert_eq!(output.metrics.correct_labels(), 2);
        assert!((output.metrics.accuracy() - 0.5).abs() < f32::EPSILON);
        Ok(())
    }

    #[test]
    fn saturated_probabilities_stay_finite() -> Result<()> {
        let device = Device::Cpu;
        let probs = Tensor::new(&[[0f32, 1.0]], &device)?;
        let targets = Tensor::new(&[[1f32, 0.0]], &device)?;
        let output = BinaryCrossEntropyLoss::new().compute(&probs, &targets)?;
        assert!((output.metrics.average_loss() - 100.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn one_hot_places_each_class() -> Result<()> {
        let ids = Tensor::new(&[2u32, 0], &Device::Cpu)?;
        let dense = one_hot(&ids, 3)?;
        assert_eq!(
            dense.to_vec2::<f32>()?,
            vec![vec![0.0, 0.0, 1.0], vec![1.0, 0.0, 0.0]]
        );
        assert!(one_hot(&ids, 2).is_err());
        Ok(())
    }

    #[test]
    fn rejects_mismatched_targets() -> Result<()> {
        let device = Device::Cpu;
        let probs = Tensor::new(&[[0.5f32, 0.5]], &device)?;
        let targets = Tensor::new(&[1f32, 0.0], &device)?;
        assert!(BinaryCrossEntropyLoss::new().compute(&probs, &targets).is_err());
        assert!(BinaryCrossEntropyLoss::new().with_threshold(1.0).is_err());
        Ok(())
    }
}
