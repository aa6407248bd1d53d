//! Delay effect — multi-tap ping-pong delay with a damped feedback loop.

use super::filter::OnePole;

/// Feedback is never allowed to reach unity.
pub const MAX_FEEDBACK: f64 = 0.95;

/// Multi-tap ping-pong delay. Tap `k` (1-based) sits `k × tap_time` behind
/// the input and lands on the left channel for odd `k`, right for even `k`.
/// The last tap feeds back into the line through a one-pole low-pass.
///
/// Output is wet only.
#[derive(Debug, Clone)]
pub struct Delay {
    buffer: Vec<f64>,
    write_pos: usize,
    tap_samples: usize,
    taps: usize,
    feedback: f64,
    lowpass: OnePole,
}

impl Delay {
    /// Create a delay with specific parameters. `tap_time` is in seconds.
    pub fn with_params(sample_rate: f64, tap_time: f64, taps: usize, feedback: f64, lowpass_hz: f64) -> Self {
        let tap_samples = ((tap_time * sample_rate).round() as usize).max(1);
        let taps = taps.max(1);
        Self {
            buffer: vec![0.0; tap_samples * taps + 1],
            write_pos: 0,
            tap_samples,
            taps,
            feedback: feedback.clamp(0.0, MAX_FEEDBACK),
            lowpass: OnePole::new(lowpass_hz, sample_rate),
        }
    }

    pub fn feedback(&self) -> f64 {
        self.feedback
    }

    #[inline]
    fn read(&self, delay: usize) -> f64 {
        let len = self.buffer.len();
        self.buffer[(self.write_pos + len - delay) % len]
    }

    /// Process one mono send sample, returning the stereo wet signal.
    #[inline]
    pub fn process(&mut self, input: f64) -> (f64, f64) {
        let mut out_l = 0.0;
        let mut out_r = 0.0;
        for k in 1..=self.taps {
            // Later taps fade so the pattern reads as a decaying echo.
            let tap = self.read(k * self.tap_samples) / k as f64;
            if k % 2 == 1 {
                out_l += tap;
            } else {
                out_r += tap;
            }
        }

        let last = self.read(self.taps * self.tap_samples);
        let damped = self.lowpass.process(last);
        self.buffer[self.write_pos] = input + damped * self.feedback;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();

        (out_l, out_r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taps_alternate_channels() {
        let mut delay = Delay::with_params(1000.0, 0.01, 3, 0.0, 400.0);
        let mut left = Vec::new();
        let mut right = Vec::new();
        for i in 0..40 {
            let (l, r) = delay.process(if i == 0 { 1.0 } else { 0.0 });
            left.push(l);
            right.push(r);
        }
        assert_eq!(left[10], 1.0, "first tap lands left");
        assert_eq!(right[10], 0.0);
        assert_eq!(right[20], 0.5, "second tap lands right");
        assert!((left[30] - 1.0 / 3.0).abs() < 1e-12, "third tap lands left");
        assert_eq!(left[0], 0.0);
    }

    #[test]
    fn test_feedback_is_clamped() {
        let delay = Delay::with_params(44100.0, 0.1, 2, 1.5, 4000.0);
        assert_eq!(delay.feedback(), MAX_FEEDBACK);
        let delay = Delay::with_params(44100.0, 0.1, 2, -0.5, 4000.0);
        assert_eq!(delay.feedback(), 0.0);
    }

    #[test]
    fn test_delay_bounded_at_max_feedback() {
        let mut delay = Delay::with_params(44100.0, 0.05, 4, 10.0, 20000.0);
        let mut peak: f64 = 0.0;
        for _ in 0..(10 * 44100) {
            let (l, r) = delay.process(1.0);
            assert!(l.is_finite() && r.is_finite());
            peak = peak.max(l.abs()).max(r.abs());
        }
        // Steady state: line holds 1 / (1 - 0.95) = 20.
        assert!(peak <= 20.0 * 2.0 + 1e-9, "delay output grew to {peak}");
    }

    #[test]
    fn test_echo_decays_without_input() {
        let mut delay = Delay::with_params(44100.0, 0.1, 2, 0.6, 3000.0);
        delay.process(1.0);
        for _ in 0..(20 * 44100) {
            delay.process(0.0);
        }
        let (l, r) = delay.process(0.0);
        assert!(l.abs() < 1e-6 && r.abs() < 1e-6);
    }
}
