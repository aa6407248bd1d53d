//! Mono sample buffer shared by synthesis, mixing and encoding.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};

/// An ordered run of samples at a fixed rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioBuffer {
    /// Diagnostic name (track name, or "master").
    pub name: String,
    pub sample_rate: u32,
    pub samples: Vec<f64>,
}

impl AudioBuffer {
    /// A silent buffer of `len` samples.
    pub fn silent(name: impl Into<String>, sample_rate: u32, len: usize) -> Self {
        AudioBuffer {
            name: name.into(),
            sample_rate,
            samples: vec![0.0; len],
        }
    }

    pub fn from_samples(name: impl Into<String>, sample_rate: u32, samples: Vec<f64>) -> Self {
        AudioBuffer {
            name: name.into(),
            sample_rate,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Largest absolute sample value (0.0 for an empty buffer).
    pub fn peak(&self) -> f64 {
        peak(&self.samples)
    }

    pub fn rms(&self) -> f64 {
        rms(&self.samples)
    }

    pub fn scale(&mut self, gain: f64) {
        for s in &mut self.samples {
            *s *= gain;
        }
    }

    /// Fail with `NumericIntegrity` at the first NaN or infinite sample.
    pub fn check_finite(&self, stage: &'static str) -> Result<()> {
        match self.samples.iter().position(|s| !s.is_finite()) {
            None => Ok(()),
            Some(index) => Err(RenderError::NumericIntegrity {
                stage,
                buffer: self.name.clone(),
                index,
            }),
        }
    }
}

pub fn peak(samples: &[f64]) -> f64 {
    samples.iter().fold(0.0_f64, |m, s| m.max(s.abs()))
}

pub fn rms(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f64).sqrt()
}
