//! Reverb effect — Schroeder-style algorithmic reverb.
//!
//! Eight parallel damped comb filters per side followed by four series
//! allpass filters. Comb feedback is derived from the requested T60 so that
//! every loop decays by 60 dB in that time; with the damping low-pass inside
//! the loop the loop gain is always below one.

use super::filter::OnePole;

/// Supported decay range in seconds.
pub const MIN_T60: f64 = 0.1;
pub const MAX_T60: f64 = 20.0;

/// A comb filter delay line with damped feedback.
#[derive(Debug, Clone)]
struct CombFilter {
    buffer: Vec<f64>,
    index: usize,
    feedback: f64,
    damping: OnePole,
}

impl CombFilter {
    fn new(size: usize, feedback: f64, damping: OnePole) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback,
            damping,
        }
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        let output = self.buffer[self.index];
        let damped = self.damping.process(output);
        self.buffer[self.index] = input + damped * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

/// An allpass filter delay line.
#[derive(Debug, Clone)]
struct AllpassFilter {
    buffer: Vec<f64>,
    index: usize,
    feedback: f64,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            feedback: 0.5,
        }
    }

    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        let bufout = self.buffer[self.index];
        let output = bufout - input;
        self.buffer[self.index] = input + bufout * self.feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }
}

// Tuning constants (scaled for 44100 Hz sample rate)
const COMB_TUNING: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];
const ALLPASS_TUNING: [usize; 4] = [556, 441, 341, 225];
const STEREO_SPREAD: usize = 23;
const INPUT_GAIN: f64 = 0.015;

/// Feedback that makes a loop of `delay` samples decay 60 dB in `t60` seconds.
pub fn comb_feedback(delay: usize, t60: f64, sample_rate: f64) -> f64 {
    let t60 = t60.clamp(MIN_T60, MAX_T60);
    10.0_f64.powf(-3.0 * delay as f64 / (t60 * sample_rate))
}

/// A stereo algorithmic reverb. Output is wet only.
#[derive(Debug, Clone)]
pub struct Reverb {
    comb_l: Vec<CombFilter>,
    comb_r: Vec<CombFilter>,
    allpass_l: Vec<AllpassFilter>,
    allpass_r: Vec<AllpassFilter>,
}

impl Reverb {
    /// Create a reverb with the given decay time and in-loop damping corner.
    pub fn with_params(sample_rate: f64, t60: f64, damping_hz: f64) -> Self {
        let scale = sample_rate / 44100.0;
        let combs = |spread: usize| -> Vec<CombFilter> {
            COMB_TUNING
                .iter()
                .map(|&t| {
                    let size = ((t + spread) as f64 * scale) as usize;
                    CombFilter::new(
                        size,
                        comb_feedback(size.max(1), t60, sample_rate),
                        OnePole::new(damping_hz, sample_rate),
                    )
                })
                .collect()
        };
        let allpasses = |spread: usize| -> Vec<AllpassFilter> {
            ALLPASS_TUNING
                .iter()
                .map(|&t| AllpassFilter::new(((t + spread) as f64 * scale) as usize))
                .collect()
        };

        Self {
            comb_l: combs(0),
            comb_r: combs(STEREO_SPREAD),
            allpass_l: allpasses(0),
            allpass_r: allpasses(STEREO_SPREAD),
        }
    }

    /// Process a stereo sample pair, returning the wet signal.
    #[inline]
    pub fn process(&mut self, left: f64, right: f64) -> (f64, f64) {
        let input = (left + right) * INPUT_GAIN;

        // Sum comb filters in parallel
        let mut out_l: f64 = self.comb_l.iter_mut().map(|c| c.process(input)).sum();
        let mut out_r: f64 = self.comb_r.iter_mut().map(|c| c.process(input)).sum();

        // Process through allpass filters in series
        for allpass in &mut self.allpass_l {
            out_l = allpass.process(out_l);
        }
        for allpass in &mut self.allpass_r {
            out_r = allpass.process(out_r);
        }

        (out_l, out_r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng;
    use rand::Rng;

    #[test]
    fn test_feedback_matches_t60() {
        // After t60 seconds a loop of `d` samples has cycled t60*sr/d times.
        let sr = 44100.0;
        let d = 1500;
        let g = comb_feedback(d, 2.0, sr);
        let cycles = 2.0 * sr / d as f64;
        assert!((g.powf(cycles) - 1e-3).abs() < 1e-9);
    }

    #[test]
    fn test_feedback_below_one_for_all_t60() {
        for t60 in [0.0, 0.1, 1.0, 5.0, 20.0, 1000.0] {
            for &d in &COMB_TUNING {
                let g = comb_feedback(d, t60, 44100.0);
                assert!(g > 0.0 && g < 1.0, "feedback {g} for t60 {t60}");
            }
        }
    }

    #[test]
    fn test_reverb_produces_output() {
        let mut reverb = Reverb::with_params(44100.0, 1.5, 6000.0);
        reverb.process(1.0, 1.0);
        let found = (0..5000).any(|_| {
            let (l, r) = reverb.process(0.0, 0.0);
            l.abs() > 0.001 || r.abs() > 0.001
        });
        assert!(found, "Reverb should produce output after impulse");
    }

    #[test]
    fn test_reverb_decays() {
        let mut reverb = Reverb::with_params(44100.0, 0.5, 6000.0);
        reverb.process(1.0, 1.0);
        for _ in 0..44100 {
            reverb.process(0.0, 0.0);
        }
        let later_max = (0..4410)
            .map(|_| {
                let (l, r) = reverb.process(0.0, 0.0);
                l.abs().max(r.abs())
            })
            .fold(0.0, f64::max);
        assert!(later_max < 1e-4, "Reverb should decay over time, got {later_max}");
    }

    #[test]
    fn test_reverb_bounded_at_longest_decay() {
        let mut reverb = Reverb::with_params(44100.0, MAX_T60, 20000.0);
        let mut noise = rng::stream(0, "test", 0);
        let mut peak: f64 = 0.0;
        for i in 0..(10 * 44100) {
            // Full-scale noise, then a constant full-scale DC push.
            let x = if i < 5 * 44100 {
                noise.random::<f64>() * 2.0 - 1.0
            } else {
                1.0
            };
            let (l, r) = reverb.process(x, x);
            assert!(l.is_finite() && r.is_finite());
            peak = peak.max(l.abs()).max(r.abs());
        }
        assert!(peak < 100.0, "reverb output grew to {peak}");
    }
}
