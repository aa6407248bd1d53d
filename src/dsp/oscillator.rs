//! Anti-aliased oscillators using PolyBLEP / PolyBLAMP.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Supported waveform shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

/// A band-limited oscillator. Step discontinuities (saw, square) get a
/// PolyBLEP correction; slope discontinuities (triangle) get PolyBLAMP.
#[derive(Debug, Clone)]
pub struct Oscillator {
    pub waveform: Waveform,
    pub frequency: f64,
    pub detune: f64, // in cents
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, sample_rate: f64) -> Self {
        Oscillator {
            waveform,
            frequency: 440.0,
            detune: 0.0,
            phase: 0.0,
            sample_rate,
        }
    }

    /// Start at a given phase in [0, 1).
    pub fn with_phase(mut self, phase: f64) -> Self {
        self.phase = phase.rem_euclid(1.0);
        self
    }

    /// Effective frequency accounting for detune (in cents).
    fn effective_freq(&self) -> f64 {
        self.frequency * (2.0_f64).powf(self.detune / 1200.0)
    }

    /// Phase increment per sample, kept below Nyquist.
    fn phase_inc(&self) -> f64 {
        (self.effective_freq() / self.sample_rate).clamp(0.0, 0.5)
    }

    /// Generate the next sample.
    pub fn next_sample(&mut self) -> f64 {
        let inc = self.phase_inc();
        let sample = match self.waveform {
            Waveform::Sine => self.sine(),
            Waveform::Sawtooth => self.sawtooth(inc),
            Waveform::Square => self.square(inc),
            Waveform::Triangle => self.triangle(inc),
        };

        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }

        sample
    }

    fn sine(&self) -> f64 {
        (2.0 * PI * self.phase).sin()
    }

    /// Naive sawtooth: rises from -1 to +1, then drops.
    /// PolyBLEP corrects the discontinuity at the wrap.
    fn sawtooth(&self, inc: f64) -> f64 {
        let naive = 2.0 * self.phase - 1.0;
        naive - poly_blep(self.phase, inc)
    }

    /// Square: +1 for the first half cycle, -1 for the second, with a
    /// correction at both edges.
    fn square(&self, inc: f64) -> f64 {
        let mut value = if self.phase < 0.5 { 1.0 } else { -1.0 };
        value += poly_blep(self.phase, inc);
        value -= poly_blep((self.phase + 0.5) % 1.0, inc);
        value
    }

    /// Triangle peaking at phase 0.25 and bottoming at 0.75. The corners
    /// are slope changes of ±8 per cycle, smoothed with PolyBLAMP.
    fn triangle(&self, inc: f64) -> f64 {
        let t = self.phase;
        let naive = if t < 0.25 {
            4.0 * t
        } else if t < 0.75 {
            2.0 - 4.0 * t
        } else {
            4.0 * t - 4.0
        };
        let corr_top = poly_blamp((t + 0.75) % 1.0, inc);
        let corr_bottom = poly_blamp((t + 0.25) % 1.0, inc);
        naive + 4.0 * inc * (corr_bottom - corr_top)
    }
}

/// PolyBLEP (Polynomial Band-Limited Step) anti-aliasing correction.
///
/// `t` is the phase [0, 1), `dt` is the phase increment per sample.
/// Returns a correction value to subtract from the naive waveform
/// at discontinuities.
fn poly_blep(t: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }
    if t < dt {
        // Just after the discontinuity
        let t = t / dt;
        2.0 * t - t * t - 1.0
    } else if t > 1.0 - dt {
        // Just before the next discontinuity
        let t = (t - 1.0) / dt;
        t * t + 2.0 * t + 1.0
    } else {
        0.0
    }
}

/// PolyBLAMP: integrated PolyBLEP, for corners in the waveform.
fn poly_blamp(t: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }
    if t < dt {
        let x = t / dt - 1.0;
        -x * x * x / 3.0
    } else if t > 1.0 - dt {
        let x = (t - 1.0) / dt + 1.0;
        x * x * x / 3.0
    } else {
        0.0
    }
}

/// Convert a MIDI note number to Hz (A4 = 440 Hz).
pub fn midi_to_frequency(note: f64) -> f64 {
    440.0 * (2.0_f64).powf((note - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(waveform: Waveform, freq: f64, n: usize) -> Vec<f64> {
        let mut osc = Oscillator::new(waveform, 44100.0);
        osc.frequency = freq;
        (0..n).map(|_| osc.next_sample()).collect()
    }

    #[test]
    fn sine_zero_at_start() {
        let sample = render(Waveform::Sine, 440.0, 1)[0];
        assert!(sample.abs() < 1e-10, "Sine should start near 0, got {sample}");
    }

    #[test]
    fn sine_range() {
        for s in render(Waveform::Sine, 440.0, 44100) {
            assert!((-1.0..=1.0).contains(&s), "Sine out of range: {s}");
        }
    }

    #[test]
    fn sawtooth_range() {
        for s in render(Waveform::Sawtooth, 440.0, 44100) {
            assert!((-1.5..=1.5).contains(&s), "Saw out of range: {s}");
        }
    }

    #[test]
    fn square_range() {
        for s in render(Waveform::Square, 440.0, 44100) {
            assert!((-1.5..=1.5).contains(&s), "Square out of range: {s}");
        }
    }

    #[test]
    fn triangle_range() {
        for s in render(Waveform::Triangle, 440.0, 44100) {
            assert!((-1.05..=1.05).contains(&s), "Triangle out of range: {s}");
        }
    }

    #[test]
    fn blep_smooths_saw_wrap() {
        // Near Nyquist the naive saw jumps by 2.0 at every wrap; the
        // corrected one never jumps by more than the naive slope allows.
        let samples = render(Waveform::Sawtooth, 5000.0, 2000);
        let max_jump = samples
            .windows(2)
            .map(|w| (w[1] - w[0]).abs())
            .fold(0.0_f64, f64::max);
        assert!(max_jump < 1.9, "saw still has a hard step: {max_jump}");
    }

    #[test]
    fn waveforms_have_no_dc() {
        // 441 Hz at 44.1 kHz: exactly 100 samples per cycle.
        for wf in [Waveform::Sawtooth, Waveform::Square, Waveform::Triangle] {
            let s = render(wf, 441.0, 4410);
            let mean = s.iter().sum::<f64>() / s.len() as f64;
            assert!(mean.abs() < 0.02, "{wf:?} DC offset {mean}");
        }
    }

    #[test]
    fn detune_shifts_frequency() {
        let mut osc1 = Oscillator::new(Waveform::Sine, 44100.0);
        osc1.frequency = 440.0;
        let mut osc2 = Oscillator::new(Waveform::Sine, 44100.0);
        osc2.frequency = 440.0;
        osc2.detune = 1200.0; // +1 octave

        let inc1 = osc1.phase_inc();
        let inc2 = osc2.phase_inc();
        assert!(
            (inc2 - 2.0 * inc1).abs() < 1e-10,
            "1200 cents detune should double frequency"
        );
    }

    #[test]
    fn midi_a4_is_440() {
        assert!((midi_to_frequency(69.0) - 440.0).abs() < 1e-9);
        assert!((midi_to_frequency(81.0) - 880.0).abs() < 1e-9);
    }
}
