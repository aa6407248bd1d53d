//! ADSR Envelope generator.

use serde::{Deserialize, Serialize};

/// Envelope stages. `Idle` is both the initial and the terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

/// Ramp shape for attack, decay and release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Curve {
    #[default]
    Linear,
    /// Fast start, slow finish; still lands exactly on the target.
    Exponential,
}

const EXP_K: f64 = 5.0;

impl Curve {
    /// Progress in [0, 1] for normalized time `t` in [0, 1].
    fn shape(self, t: f64) -> f64 {
        match self {
            Curve::Linear => t,
            Curve::Exponential => (1.0 - (-EXP_K * t).exp()) / (1.0 - (-EXP_K).exp()),
        }
    }
}

/// Independent ramp shapes for the three moving stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeCurves {
    pub attack: Curve,
    pub decay: Curve,
    pub release: Curve,
}

impl EnvelopeCurves {
    /// The same shape for every stage.
    pub fn uniform(curve: Curve) -> Self {
        EnvelopeCurves {
            attack: curve,
            decay: curve,
            release: curve,
        }
    }
}

/// Release time used when a voice is stolen.
pub const FAST_RELEASE_SECONDS: f64 = 0.005;

/// ADSR Envelope.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Attack time in seconds.
    pub attack: f64,
    /// Decay time in seconds.
    pub decay: f64,
    /// Sustain level [0, 1].
    pub sustain: f64,
    /// Release time in seconds.
    pub release: f64,
    pub curves: EnvelopeCurves,

    stage: Stage,
    level: f64,
    sample_rate: f64,
    /// Length of the current stage in samples.
    stage_samples: usize,
    stage_counter: usize,
    /// Level at the start of the current stage.
    start_level: f64,
}

impl Envelope {
    pub fn new(sample_rate: f64) -> Self {
        Envelope {
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.3,
            curves: EnvelopeCurves::default(),
            stage: Stage::Idle,
            level: 0.0,
            sample_rate,
            stage_samples: 0,
            stage_counter: 0,
            start_level: 0.0,
        }
    }

    pub fn with_adsr(mut self, attack: f64, decay: f64, sustain: f64, release: f64, curve: Curve) -> Self {
        self.attack = attack.max(0.0);
        self.decay = decay.max(0.0);
        self.sustain = sustain.clamp(0.0, 1.0);
        self.release = release.max(0.0);
        self.curves = EnvelopeCurves::uniform(curve);
        self
    }

    /// Give attack, decay and release their own shapes.
    pub fn with_curves(mut self, curves: EnvelopeCurves) -> Self {
        self.curves = curves;
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    fn samples(&self, seconds: f64) -> usize {
        (seconds * self.sample_rate).round() as usize
    }

    /// Trigger the envelope (note on).
    pub fn gate_on(&mut self) {
        self.stage = Stage::Attack;
        self.stage_samples = self.samples(self.attack);
        self.stage_counter = 0;
        self.start_level = self.level; // retrigger from current level
    }

    /// Release the envelope (note off).
    pub fn gate_off(&mut self) {
        let release = self.release;
        self.release_over(release);
    }

    /// Release over `FAST_RELEASE_SECONDS`, for voice stealing.
    pub fn force_release(&mut self) {
        self.release_over(self.release.min(FAST_RELEASE_SECONDS));
    }

    fn release_over(&mut self, seconds: f64) {
        if self.stage == Stage::Idle {
            return;
        }
        self.stage = Stage::Release;
        self.stage_samples = self.samples(seconds);
        self.stage_counter = 0;
        self.start_level = self.level;
    }

    /// Generate the next envelope sample [0, 1].
    pub fn next_sample(&mut self) -> f64 {
        match self.stage {
            Stage::Idle => {
                self.level = 0.0;
            }
            Stage::Attack => {
                if let Some(p) = self.advance() {
                    self.level = self.start_level + (1.0 - self.start_level) * self.curves.attack.shape(p);
                } else {
                    self.level = 1.0;
                    self.stage = Stage::Decay;
                    self.stage_samples = self.samples(self.decay);
                    self.stage_counter = 0;
                }
            }
            Stage::Decay => {
                if let Some(p) = self.advance() {
                    self.level = 1.0 - (1.0 - self.sustain) * self.curves.decay.shape(p);
                } else {
                    self.level = self.sustain;
                    self.stage = Stage::Sustain;
                }
            }
            Stage::Sustain => {
                self.level = self.sustain;
            }
            Stage::Release => {
                if let Some(p) = self.advance() {
                    self.level = self.start_level * (1.0 - self.curves.release.shape(p));
                } else {
                    self.level = 0.0;
                    self.stage = Stage::Idle;
                }
            }
        }
        self.level
    }

    /// Step the stage counter. `None` once the stage is complete.
    fn advance(&mut self) -> Option<f64> {
        if self.stage_counter >= self.stage_samples {
            return None;
        }
        self.stage_counter += 1;
        Some(self.stage_counter as f64 / self.stage_samples as f64)
    }

    /// Returns true if the envelope has finished (idle after release).
    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(env: &mut Envelope, n: usize) -> Vec<f64> {
        (0..n).map(|_| env.next_sample()).collect()
    }

    #[test]
    fn starts_idle() {
        let env = Envelope::new(44100.0);
        assert!(env.is_finished());
        assert_eq!(env.stage(), Stage::Idle);
    }

    #[test]
    fn attack_reaches_one() {
        let mut env = Envelope::new(44100.0);
        env.attack = 0.01; // 441 samples
        env.gate_on();

        let max_level = run(&mut env, 500).into_iter().fold(0.0, f64::max);
        assert!(
            (max_level - 1.0).abs() < 1e-12,
            "Attack should reach 1.0, got {max_level}"
        );
    }

    #[test]
    fn stages_advance_in_order() {
        let mut env = Envelope::new(1000.0).with_adsr(0.01, 0.01, 0.5, 0.01, Curve::Linear);
        env.gate_on();
        assert_eq!(env.stage(), Stage::Attack);
        run(&mut env, 11);
        assert_eq!(env.stage(), Stage::Decay);
        run(&mut env, 11);
        assert_eq!(env.stage(), Stage::Sustain);
        env.gate_off();
        assert_eq!(env.stage(), Stage::Release);
        run(&mut env, 11);
        assert_eq!(env.stage(), Stage::Idle);
    }

    #[test]
    fn sustain_holds() {
        let mut env = Envelope::new(44100.0);
        env.attack = 0.001;
        env.decay = 0.001;
        env.sustain = 0.6;
        env.gate_on();
        run(&mut env, 500);

        let s = env.next_sample();
        assert!((s - 0.6).abs() < 1e-12, "Should sustain at 0.6, got {s}");
    }

    #[test]
    fn release_to_zero() {
        for curve in [Curve::Linear, Curve::Exponential] {
            let mut env = Envelope::new(44100.0).with_adsr(0.001, 0.001, 0.7, 0.01, curve);
            env.gate_on();
            run(&mut env, 500);
            env.gate_off();
            run(&mut env, 1000);

            assert!(env.is_finished(), "{curve:?}: should be finished after release");
            assert_eq!(env.level(), 0.0);
        }
    }

    #[test]
    fn exponential_attack_is_faster_early() {
        let mut lin = Envelope::new(1000.0).with_adsr(0.1, 0.1, 0.5, 0.1, Curve::Linear);
        let mut exp = Envelope::new(1000.0).with_adsr(0.1, 0.1, 0.5, 0.1, Curve::Exponential);
        lin.gate_on();
        exp.gate_on();
        let l = run(&mut lin, 20);
        let e = run(&mut exp, 20);
        assert!(e[19] > l[19], "exp {} should lead linear {}", e[19], l[19]);
    }

    #[test]
    fn stages_use_their_own_curves() {
        let curves = EnvelopeCurves {
            attack: Curve::Linear,
            decay: Curve::Linear,
            release: Curve::Exponential,
        };
        let mut env = Envelope::new(1000.0)
            .with_adsr(0.1, 0.1, 1.0, 0.1, Curve::Linear)
            .with_curves(curves);
        env.gate_on();
        let attack = run(&mut env, 50);
        assert!((attack[49] - 0.5).abs() < 1e-12, "linear attack midpoint {}", attack[49]);
        run(&mut env, 300);
        assert_eq!(env.stage(), Stage::Sustain);

        env.gate_off();
        let release = run(&mut env, 50);
        // Exponential release has fallen further than a linear one would.
        assert!(release[49] < 0.5 - 0.1, "release midpoint {}", release[49]);
        run(&mut env, 60);
        assert!(env.is_finished());
    }

    #[test]
    fn force_release_is_fast() {
        let mut env = Envelope::new(44100.0).with_adsr(0.001, 0.001, 0.8, 2.0, Curve::Linear);
        env.gate_on();
        run(&mut env, 500);
        env.force_release();
        run(&mut env, (FAST_RELEASE_SECONDS * 44100.0) as usize + 2);
        assert!(env.is_finished());
    }

    #[test]
    fn full_cycle_range() {
        let mut env = Envelope::new(44100.0).with_adsr(0.01, 0.05, 0.5, 0.1, Curve::Exponential);
        env.gate_on();
        for s in run(&mut env, 10000) {
            assert!((0.0..=1.0).contains(&s), "Envelope out of range: {s}");
        }
        env.gate_off();
        for s in run(&mut env, 10000) {
            assert!((0.0..=1.0).contains(&s), "Envelope out of range after release: {s}");
        }
        assert!(env.is_finished());
    }
}
