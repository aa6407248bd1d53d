//! Zero-delay-feedback state-variable filter and a one-pole low-pass.
//!
//! The SVF uses the trapezoidal (topology-preserving) integrator form: the
//! instantaneous feedback loop is solved per sample instead of being broken
//! with a unit delay, so the response stays accurate and stable right up to
//! Nyquist and at full resonance.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Filter response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    Lowpass,
    Highpass,
    Bandpass,
}

/// Time constant of the cutoff/resonance smoothing.
const SMOOTHING_SECONDS: f64 = 0.005;

/// TPT state-variable filter with smoothed cutoff and resonance.
#[derive(Debug, Clone)]
pub struct SvfFilter {
    pub mode: FilterMode,

    target_cutoff: f64,
    target_resonance: f64,
    cutoff: f64,
    resonance: f64,
    smoothing: f64,

    // Coefficients
    k: f64,
    a1: f64,
    a2: f64,
    a3: f64,

    // Integrator state
    ic1eq: f64,
    ic2eq: f64,

    sample_rate: f64,
}

impl SvfFilter {
    pub fn new(mode: FilterMode, sample_rate: f64) -> Self {
        let mut f = SvfFilter {
            mode,
            target_cutoff: 1000.0,
            target_resonance: 0.0,
            cutoff: 1000.0,
            resonance: 0.0,
            smoothing: (-1.0 / (SMOOTHING_SECONDS * sample_rate)).exp(),
            k: 2.0,
            a1: 0.0,
            a2: 0.0,
            a3: 0.0,
            ic1eq: 0.0,
            ic2eq: 0.0,
            sample_rate,
        };
        f.update_coefficients();
        f
    }

    /// Jump straight to the given parameters (no smoothing).
    pub fn with_params(mut self, cutoff: f64, resonance: f64) -> Self {
        self.target_cutoff = self.clamp_cutoff(cutoff);
        self.target_resonance = resonance.clamp(0.0, 1.0);
        self.cutoff = self.target_cutoff;
        self.resonance = self.target_resonance;
        self.update_coefficients();
        self
    }

    /// Glide towards a new cutoff in Hz.
    pub fn set_cutoff(&mut self, cutoff: f64) {
        self.target_cutoff = self.clamp_cutoff(cutoff);
    }

    /// Glide towards a new resonance in [0, 1].
    pub fn set_resonance(&mut self, resonance: f64) {
        self.target_resonance = resonance.clamp(0.0, 1.0);
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }

    fn clamp_cutoff(&self, cutoff: f64) -> f64 {
        cutoff.clamp(10.0, self.sample_rate * 0.49)
    }

    fn update_coefficients(&mut self) {
        let g = (PI * self.cutoff / self.sample_rate).tan();
        // resonance 0 -> k = 2 (Q 0.5), resonance 1 -> k = 0.04 (Q 25)
        self.k = 2.0 * (1.0 - 0.98 * self.resonance);
        self.a1 = 1.0 / (1.0 + g * (g + self.k));
        self.a2 = g * self.a1;
        self.a3 = g * self.a2;
    }

    fn smooth_parameters(&mut self) {
        let dc = self.target_cutoff - self.cutoff;
        let dr = self.target_resonance - self.resonance;
        if dc.abs() < 1e-6 && dr.abs() < 1e-9 {
            return;
        }
        self.cutoff = self.target_cutoff - dc * self.smoothing;
        self.resonance = self.target_resonance - dr * self.smoothing;
        self.update_coefficients();
    }

    /// Run one sample and return all three responses `(low, band, high)`.
    pub fn process_all(&mut self, input: f64) -> (f64, f64, f64) {
        self.smooth_parameters();
        let v3 = input - self.ic2eq;
        let v1 = self.a1 * self.ic1eq + self.a2 * v3;
        let v2 = self.ic2eq + self.a2 * self.ic1eq + self.a3 * v3;
        self.ic1eq = 2.0 * v1 - self.ic1eq;
        self.ic2eq = 2.0 * v2 - self.ic2eq;
        let high = input - self.k * v1 - v2;
        (v2, v1, high)
    }

    /// Process a single sample in the configured mode.
    pub fn process(&mut self, input: f64) -> f64 {
        let (low, band, high) = self.process_all(input);
        match self.mode {
            FilterMode::Lowpass => low,
            FilterMode::Highpass => high,
            FilterMode::Bandpass => band,
        }
    }
}

// ── One-pole ────────────────────────────────────────────────

/// One-pole low-pass, used inside feedback loops for damping.
#[derive(Debug, Clone)]
pub struct OnePole {
    coeff: f64,
    state: f64,
}

impl OnePole {
    pub fn new(cutoff: f64, sample_rate: f64) -> Self {
        let fc = cutoff.clamp(1.0, sample_rate * 0.49);
        OnePole {
            coeff: 1.0 - (-2.0 * PI * fc / sample_rate).exp(),
            state: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        self.state += self.coeff * (input - self.state);
        self.state
    }
}
