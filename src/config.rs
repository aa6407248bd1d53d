//! Render configuration — loaded once per render and passed by reference
//! through every stage.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, Result};

/// Quality preset. Controls how many notes a track may hold at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Draft,
    #[default]
    Standard,
    Hq,
}

impl Quality {
    /// Maximum number of held (not yet released) voices per track.
    pub fn voice_limit(self) -> usize {
        match self {
            Quality::Draft => 6,
            Quality::Standard => 12,
            Quality::Hq => 24,
        }
    }
}

/// Immutable rendering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Peak level the master is normalized to, in dBFS.
    pub target_peak_db: f64,
    /// Extra safety margin below `target_peak_db`, in dB.
    pub headroom_db: f64,
    /// Low-frequency content below this is summed to mono.
    pub mono_bass_crossover_hz: f64,
    /// Overrides the plan's quality preset when set.
    pub quality: Option<Quality>,
    /// Seconds appended after the last bar for release and effect tails.
    pub tail_seconds: f64,
    /// Apply TPDF dither when writing WAV files.
    pub dither: bool,
    /// Size of a dedicated synthesis thread pool (None = global pool).
    pub workers: Option<usize>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            sample_rate: 44100,
            target_peak_db: -1.0,
            headroom_db: 0.0,
            mono_bass_crossover_hz: 120.0,
            quality: None,
            tail_seconds: 2.0,
            dither: true,
            workers: None,
        }
    }
}

impl RenderConfig {
    /// Parse and validate a JSON config. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: RenderConfig = serde_json::from_str(json)
            .map_err(|e| RenderError::validation("config", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(8_000..=192_000).contains(&self.sample_rate) {
            return Err(RenderError::validation(
                "sample_rate",
                format!("{} Hz is outside 8000..=192000", self.sample_rate),
            ));
        }
        if !self.target_peak_db.is_finite() || self.target_peak_db > 0.0 {
            return Err(RenderError::validation(
                "target_peak_db",
                format!("{} must be finite and <= 0 dBFS", self.target_peak_db),
            ));
        }
        if !self.headroom_db.is_finite() || self.headroom_db < 0.0 {
            return Err(RenderError::validation(
                "headroom_db",
                format!("{} must be finite and >= 0", self.headroom_db),
            ));
        }
        let nyquist = self.sample_rate as f64 / 2.0;
        if !(self.mono_bass_crossover_hz > 0.0 && self.mono_bass_crossover_hz < nyquist) {
            return Err(RenderError::validation(
                "mono_bass_crossover_hz",
                format!("{} Hz must be between 0 and {nyquist} Hz", self.mono_bass_crossover_hz),
            ));
        }
        if !self.tail_seconds.is_finite() || self.tail_seconds < 0.0 {
            return Err(RenderError::validation(
                "tail_seconds",
                format!("{} must be finite and >= 0", self.tail_seconds),
            ));
        }
        if self.workers == Some(0) {
            return Err(RenderError::validation("workers", "must be at least 1"));
        }
        Ok(())
    }

    /// Linear amplitude the master peak is scaled to.
    pub fn target_peak_linear(&self) -> f64 {
        db_to_linear(self.target_peak_db - self.headroom_db)
    }
}

/// Convert dB to linear amplitude.
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}
