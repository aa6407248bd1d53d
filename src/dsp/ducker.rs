//! Sidechain ducker — attenuates the mix while a source track is loud.

/// Peak envelope follower driving a gain reduction.
#[derive(Debug, Clone)]
pub struct Ducker {
    /// Maximum attenuation [0, 1]; 1 silences the mix at full envelope.
    pub depth: f64,
    attack_coef: f64,
    release_coef: f64,

    // Internal state
    envelope: f64,
}

impl Ducker {
    /// Create a ducker. `attack` and `release` are in seconds.
    pub fn with_params(sample_rate: f64, depth: f64, attack: f64, release: f64) -> Self {
        let coef = |t: f64| (-1.0 / (t.max(1e-5) * sample_rate)).exp();
        Self {
            depth: depth.clamp(0.0, 1.0),
            attack_coef: coef(attack),
            release_coef: coef(release),
            envelope: 0.0,
        }
    }

    /// Feed one sidechain sample and return the gain to apply to the mix.
    #[inline]
    pub fn process(&mut self, sidechain: f64) -> f64 {
        let level = sidechain.abs();
        let coef = if level > self.envelope {
            self.attack_coef
        } else {
            self.release_coef
        };
        self.envelope = coef * self.envelope + (1.0 - coef) * level;
        (1.0 - self.depth * self.envelope.min(1.0)).clamp(0.0, 1.0)
    }

    pub fn envelope(&self) -> f64 {
        self.envelope
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_leaves_mix_untouched() {
        let mut d = Ducker::with_params(44100.0, 0.8, 0.002, 0.1);
        for _ in 0..1000 {
            assert_eq!(d.process(0.0), 1.0);
        }
    }

    #[test]
    fn test_loud_source_ducks_by_depth() {
        let mut d = Ducker::with_params(44100.0, 0.6, 0.002, 0.1);
        let mut gain = 1.0;
        for _ in 0..4410 {
            gain = d.process(1.0);
        }
        assert!((gain - 0.4).abs() < 1e-3, "expected 0.4, got {gain}");
    }

    #[test]
    fn test_attack_faster_than_release() {
        let mut d = Ducker::with_params(44100.0, 1.0, 0.002, 0.2);
        for _ in 0..441 {
            d.process(1.0);
        }
        let after_attack = d.envelope();
        assert!(after_attack > 0.99, "10 ms of attack reached only {after_attack}");
        for _ in 0..441 {
            d.process(0.0);
        }
        assert!(d.envelope() > 0.9, "release is too fast: {}", d.envelope());
    }

    #[test]
    fn test_gain_stays_in_unit_range() {
        let mut d = Ducker::with_params(44100.0, 1.0, 0.001, 0.01);
        for i in 0..10000 {
            let g = d.process(if i % 7 == 0 { 5.0 } else { -3.0 });
            assert!((0.0..=1.0).contains(&g));
        }
    }
}
