//! Loudness and dynamics metrics for a rendered master.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dsp::buffer::{AudioBuffer, peak, rms};
use crate::error::{RenderError, Result};
use crate::output::write_atomic;
use crate::wav::read_wav;

/// Flat weighting standing in for a K-weighting filter.
const LOUDNESS_WEIGHT: f64 = 0.85;

/// Summary metrics of a mono buffer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioMetrics {
    pub peak: f64,
    pub rms: f64,
    /// Peak over RMS; 0 for silence.
    pub crest_factor: f64,
    /// Rough loudness in dB of the weighted RMS. `None` for silence.
    pub lufs_approx: Option<f64>,
}

impl AudioMetrics {
    pub fn from_samples(samples: &[f64]) -> Self {
        let peak = peak(samples);
        let rms = rms(samples);
        let crest_factor = if rms > 0.0 { peak / rms } else { 0.0 };
        let weighted = rms * LOUDNESS_WEIGHT;
        let lufs_approx = (weighted > 0.0).then(|| 20.0 * weighted.log10());
        AudioMetrics {
            peak,
            rms,
            crest_factor,
            lufs_approx,
        }
    }

    pub fn from_buffer(buffer: &AudioBuffer) -> Self {
        Self::from_samples(&buffer.samples)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| RenderError::encoding("json", 0, e.to_string()))
    }

    /// Atomically write the metrics as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        write_atomic(path, self.to_json()?.as_bytes())
    }
}

/// Decode a WAV file written by this crate and measure it.
pub fn analyze_wav(path: &Path) -> Result<AudioMetrics> {
    let buffer = read_wav(path)?;
    let metrics = AudioMetrics::from_buffer(&buffer);
    tracing::debug!(path = %path.display(), peak = metrics.peak, rms = metrics.rms, "analyzed wav");
    Ok(metrics)
}
