//! Inverted dropout with a deterministic, seedable mask generator.
//!
//! Masks are sampled on the host from a small LCG so that a given seed always
//! produces the same sequence of masks, then scaled by `1 / keep_prob`. The
//! layer is a no-op once [`Dropout::set_training`] switches it to evaluation.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use candle_core::{DType, Error, Result, Tensor};

use crate::{checks, dtypes::PrecisionPolicy};

/// Dropout policy: either disabled or active with a probability and RNG.
#[derive(Debug)]
pub enum DropoutMode {
    /// Dropout is disabled (probability zero or outside `(0, 1)`).
    Disabled,
    /// Dropout is active and uses the supplied probability and RNG seed.
    Enabled { probability: f32, rng: Mutex<Lcg64> },
}

impl Clone for DropoutMode {
    fn clone(&self) -> Self {
        match self {
            DropoutMode::Disabled => DropoutMode::Disabled,
            DropoutMode::Enabled { probability, rng } => {
                // A poisoned lock loses the stream position; restart from zero.
                let state = match rng.lock() {
                    Ok(guard) => guard.clone(),
                    Err(_poisoned) => Lcg64::new(0),
                };
                DropoutMode::Enabled {
                    probability: *probability,
                    rng: Mutex::new(state),
                }
            }
        }
    }
}

impl DropoutMode {
    /// Builds a mode from a probability; values outside `(0, 1)` disable dropout.
    pub fn from_probability(probability: f32, seed: u64) -> Self {
        if probability <= 0.0 || probability >= 1.0 {
            DropoutMode::Disabled
        } else {
            DropoutMode::Enabled {
                probability,
                rng: Mutex::new(Lcg64::new(seed)),
            }
        }
    }

    pub fn probability(&self) -> f32 {
        match self {
            DropoutMode::Disabled => 0.0,
            DropoutMode::Enabled { probability, .. } => *probability,
        }
    }
}

/// Dropout layer toggled between training and evaluation.
pub struct Dropout {
    mode: DropoutMode,
    training: AtomicBool,
}

impl Clone for Dropout {
    fn clone(&self) -> Self {
        Self {
            mode: self.mode.clone(),
            training: AtomicBool::new(self.is_training()),
        }
    }
}

impl fmt::Debug for Dropout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dropout")
            .field("mode", &self.mode)
            .field("training", &self.is_training())
            .finish()
    }
}

impl Dropout {
    /// Creates a dropout layer in training mode.
    pub fn new(probability: f32, seed: u64) -> Self {
        Self {
            mode: DropoutMode::from_probability(probability, seed),
            training: AtomicBool::new(true),
        }
    }

    pub fn mode(&self) -> &DropoutMode {
        &self.mode
    }

    /// Enables or disables dropout based on training mode.
    pub fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    pub fn is_training(&self) -> bool {
        self.training.load(Ordering::Relaxed)
    }

    /// Applies dropout to `input`; identity in evaluation mode.
    pub fn forward(&self, input: &Tensor, policy: &PrecisionPolicy) -> Result<Tensor> {
        if !self.is_training() {
            return Ok(input.clone());
        }
        match &self.mode {
            DropoutMode::Disabled => Ok(input.clone()),
            DropoutMode::Enabled { probability, rng } => {
                let keep_prob = 1.0 - probability;
                let dims = input.dims().to_vec();
                let device = input.device();
                let dtype = policy.compute();
                let total = input.elem_count();
                let mut rng = rng
                    .lock()
                    .map_err(|_| Error::Msg("dropout RNG mutex poisoned".into()))?;
                let mask_data: Vec<f32> = (0..total)
                    .map(|_| if rng.next_f32() < keep_prob { 1.0 } else { 0.0 })
                    .collect();
                checks::ensure_cast_supported("dropout.mask", DType::F32, dtype)?;
                let mask = Tensor::from_vec(mask_data, dims, device)?.to_dtype(dtype)?;
                let compute = policy.cast_for_matmul(input)?;
                let dropped = compute.mul(&mask)?.affine(1.0 / keep_prob as f64, 0.0)?;
                policy.cast_to_storage(&dropped)
            }
        }
    }
}

/// Simple 64-bit linear congruential generator for deterministic dropout masks.
#[derive(Debug, Clone)]
pub struct Lcg64 {
    state: u64,
}

impl Lcg64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // Parameters from Numerical Recipes.
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.state
    }

    fn next_f32(&mut self) -> f32 {
        const SCALE: f64 = 1.0 / ((1u64 << 53) as f64);
        let bits = self.next_u64() >> 11;
        (bits as f64 * SCALE) as f32
    }
}
